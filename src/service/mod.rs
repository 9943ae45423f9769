pub mod error_messages;
pub mod images;
pub mod pool;
pub mod quota;
pub mod settings;
pub mod usage;

pub use error_messages::ErrorMessageService;
pub use images::ImageStorage;
pub use pool::{CredentialPool, ModelGroup};
pub use quota::QuotaGuard;
pub use settings::RuntimeSettings;
pub use usage::{UsageEvent, UsageLogger};
