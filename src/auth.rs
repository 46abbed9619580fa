use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::{PgWireError, PgWireResult};

/// The single user/password pair the server accepts.
#[derive(Debug)]
pub struct HotelbookAuthSource {
    user: String,
    password: String,
}

impl HotelbookAuthSource {
    pub fn new(user: String, password: String) -> Self {
        Self { user, password }
    }
}

#[async_trait]
impl AuthSource for HotelbookAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        let user = login.user().unwrap_or_default();
        if user != self.user {
            metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL).increment(1);
            return Err(PgWireError::InvalidPassword(user.to_string()));
        }
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
