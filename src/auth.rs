use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;
use tracing::debug;

/// Single shared password for every wire client; the user name is not checked.
#[derive(Debug)]
pub struct ListboardAuthSource {
    password: String,
}

impl ListboardAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for ListboardAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        debug!("auth for user {:?} on {:?}", login.user(), login.database());
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
