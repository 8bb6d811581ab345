pub mod audit_event;
pub mod refresh_token;
pub mod session;
pub mod user;

pub use audit_event::{AuditEvent, AuditEventType};
pub use refresh_token::RefreshToken;
pub use session::UserSession;
pub use user::{NewUser, User};
