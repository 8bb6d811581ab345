pub mod password;
pub mod phone;
pub mod validation;

pub use password::{hash_password, password_matches, Password};
pub use phone::mask_phone;
pub use validation::ValidatedJson;
