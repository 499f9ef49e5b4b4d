pub mod auth_token;
pub mod tax_invoice;
pub mod user;

pub use auth_token::{AuthToken, Session};
pub use tax_invoice::{
    InvoiceItem, InvoiceParty, InvoiceStatus, InvoiceType, TaxInvoice, TaxInvoiceDraft, TaxType,
};
pub use user::{Role, User};

/// DB の TEXT 値が既知の列挙値に一致しない
#[derive(Debug, thiserror::Error)]
#[error("未知の値: {0}")]
pub struct UnknownVariant(pub String);
