pub mod tax_invoice;
pub mod user;

pub use tax_invoice::{InvoiceStore, TaxInvoiceRepository};
pub use user::UserRepository;
