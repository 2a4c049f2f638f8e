use greenlight_auth::Account;

/// Who is making the request, as resolved by the `authenticate` middleware.
///
/// Present in the extensions of every request that passed through it.
#[derive(Debug, Clone)]
pub enum AuthContext {
    Anonymous,
    Account(Box<Account>),
}

impl AuthContext {
    pub fn account(&self) -> Option<&Account> {
        match self {
            AuthContext::Anonymous => None,
            AuthContext::Account(account) => Some(account),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, AuthContext::Anonymous)
    }
}

impl From<Account> for AuthContext {
    fn from(account: Account) -> Self {
        AuthContext::Account(Box::new(account))
    }
}
