pub mod registration;
pub mod session;

pub use registration::{register, register_google, register_phone, send_step_up_code};
pub use session::{
    introspect, login, login_google, login_ldap, refresh, revoke, verify_two_factor,
};
