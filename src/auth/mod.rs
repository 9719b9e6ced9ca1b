pub mod session;
pub mod state_cookie;

pub use session::{bearer_token, SessionSigner};
pub use state_cookie::{clear_state_cookie, state_cookie, verify_state_cookie};
