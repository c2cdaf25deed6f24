//! Caller identity and the local account directory

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::core::{Error, Result, UserId};
use crate::store::{ACCOUNTS_KEY, CURRENT_USER_KEY, JsonStore};

pub const MIN_PASSWORD_LEN: usize = 6;

/// Stored identity, or a freshly minted one that is stored before returning.
pub fn resolve_identity(store: &JsonStore) -> Result<UserId> {
    match store.read::<UserId>(CURRENT_USER_KEY) {
        Ok(Some(id)) => return Ok(id),
        Ok(None) => {}
        Err(e) => warn!("Ignoring unreadable identity: {}", e),
    }
    let id = UserId::generate();
    store.write(CURRENT_USER_KEY, &id)?;
    info!("New identity {}", id);
    Ok(id)
}

pub fn set_current_user(store: &JsonStore, id: &UserId) -> Result<()> {
    store.write(CURRENT_USER_KEY, id)
}

fn digest(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: UserId,
    pub username: String,
    pub email: String,
    /// SHA-256 of the password, hex encoded
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct AccountDirectory {
    /// Newest first
    accounts: Vec<Account>,
}

impl AccountDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(store: &JsonStore) -> Self {
        Self { accounts: store.load_or_default(ACCOUNTS_KEY) }
    }

    pub fn save(&self, store: &JsonStore) -> Result<()> {
        store.write(ACCOUNTS_KEY, &self.accounts)
    }

    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    pub fn find_by_email(&self, email: &str) -> Option<&Account> {
        let email = email.trim();
        self.accounts.iter().find(|a| a.email.eq_ignore_ascii_case(email))
    }

    pub fn register(&mut self, username: &str, email: &str, password: &str, confirm: &str) -> Result<UserId> {
        let username = username.trim();
        let email = email.trim();
        if username.is_empty() || email.is_empty() || password.trim().is_empty() {
            return Err(Error::Validation("username, email and password are required".into()));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(Error::Validation(format!(
                "password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }
        if password != confirm {
            return Err(Error::Validation("passwords do not match".into()));
        }
        if self.find_by_email(email).is_some() {
            return Err(Error::Validation("email already used, please sign in".into()));
        }

        let account = Account {
            id: UserId::generate(),
            username: username.to_string(),
            email: email.to_string(),
            password_hash: digest(password),
            created_at: Utc::now(),
        };
        let id = account.id.clone();
        self.accounts.insert(0, account);
        info!("Registered {} as {}", email, id);
        Ok(id)
    }

    pub fn sign_in(&self, email: &str, password: &str) -> Result<UserId> {
        self.find_by_email(email)
            .filter(|a| a.password_hash == digest(password))
            .map(|a| a.id.clone())
            .ok_or_else(|| Error::Validation("invalid email or password".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::scratch_dir;

    #[test]
    fn test_register_rules() {
        let mut dir = AccountDirectory::new();
        assert!(dir.register("", "a@b.c", "secret1", "secret1").is_err());
        assert!(dir.register("ann", "a@b.c", "short", "short").is_err());
        assert!(dir.register("ann", "a@b.c", "secret1", "secret2").is_err());

        let id = dir.register(" ann ", "Ann@Example.com", "secret1", "secret1").unwrap();
        assert_eq!(dir.accounts()[0].username, "ann");
        assert_ne!(dir.accounts()[0].password_hash, "secret1");
        assert_eq!(dir.accounts()[0].password_hash.len(), 64);

        let dup = dir.register("other", "ann@example.COM", "secret1", "secret1").unwrap_err();
        assert!(dup.is_user_facing());
        assert_eq!(dir.accounts().len(), 1);

        assert_eq!(dir.sign_in("ANN@example.com", "secret1").unwrap(), id);
        assert!(dir.sign_in("ann@example.com", "secret2").is_err());
        assert!(dir.sign_in("nobody@example.com", "secret1").is_err());
    }

    #[test]
    fn test_identity_is_stable() {
        let path = scratch_dir();
        let store = JsonStore::open(&path).unwrap();

        let first = resolve_identity(&store).unwrap();
        assert!(first.as_str().starts_with("u_"));
        assert_eq!(resolve_identity(&store).unwrap(), first);

        let mut accounts = AccountDirectory::load(&store);
        let id = accounts.register("bo", "bo@example.com", "hunter22", "hunter22").unwrap();
        accounts.save(&store).unwrap();
        set_current_user(&store, &id).unwrap();

        assert_eq!(resolve_identity(&store).unwrap(), id);
        assert_eq!(AccountDirectory::load(&store).sign_in("bo@example.com", "hunter22").unwrap(), id);
        std::fs::remove_dir_all(path).unwrap();
    }
}
