pub mod auth;
pub mod email;
pub mod fiscal;
pub mod invoice;
pub mod keyed_lock;
pub mod session;
pub mod session_gate;
pub mod sweeper;
pub mod token_store;

pub use auth::AuthService;
pub use email::{LogMailer, Mailer};
pub use fiscal::{FiscalClient, FiscalGateway};
pub use invoice::InvoiceLifecycleManager;
pub use session::SessionStore;
pub use session_gate::{Identity, SessionGate};
pub use token_store::TokenStore;
