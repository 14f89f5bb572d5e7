pub mod url_validation;
pub use url_validation::{UrlValidationError, validate_broker_url, validate_credentialed_url};
