use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{
    abort, ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
    TransactionResult, TransactionalTree,
};
use sled::{Db, Transactional, Tree};
use std::path::Path;

use crate::error::{Error, Result};
use crate::models::{
    Account, Alert, Assignment, CollectionRecord, Credentials, Role, Route, ScheduledPickup,
    VerificationStatus,
};

pub const EMAIL_TAKEN: &str = "Email already exists";
pub const USERNAME_TAKEN: &str = "Username already taken";
pub const LAST_ADMIN: &str = "Cannot delete the last active administrator";

// keys of the meta tree
const ADMINS: &str = "admins";
const ACTIVE_ADMINS: &str = "active_admins";

/// Sequences behind the prefixed, zero-padded identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sequence {
    Account(Role),
    Route,
    Alert,
    Assignment,
    Pickup,
}

impl Sequence {
    fn key(&self) -> &'static str {
        match self {
            Sequence::Account(Role::User) => "account:user",
            Sequence::Account(Role::Picker) => "account:picker",
            Sequence::Account(Role::Admin) => "account:admin",
            Sequence::Route => "route",
            Sequence::Alert => "alert",
            Sequence::Assignment => "assignment",
            Sequence::Pickup => "pickup",
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            Sequence::Account(role) => role.id_prefix(),
            Sequence::Route => "R",
            Sequence::Alert => "AL",
            Sequence::Assignment => "AS",
            Sequence::Pickup => "P",
        }
    }
}

/// Whether an account insert may add an administrator next to existing ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminRule {
    Any,
    /// Only while the store has no administrator at all
    FirstOnly,
}

/// Prefix plus a counter padded to at least three digits: `WP007`, `R1000`.
pub fn format_id(prefix: &str, n: u64) -> String {
    format!("{prefix}{n:03}")
}

/// Numeric tail of a generated id, used for ordering (`R010` sorts after `R009`)
pub fn id_number(id: &str) -> u64 {
    let digits: String = id.chars().skip_while(|c| !c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

/// Emails and usernames are unique regardless of case.
fn index_key(value: &str) -> String {
    value.trim().to_lowercase()
}

fn counts_as_active_admin(account: &Account) -> bool {
    account.role == Role::Admin && account.is_active()
}

fn settle<T>(result: TransactionResult<T, Error>) -> Result<T> {
    result.map_err(|e| match e {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => Error::Storage(e),
    })
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> ConflictableTransactionResult<T, Error> {
    serde_json::from_slice(bytes).map_err(|e| ConflictableTransactionError::Abort(e.into()))
}

fn encode<T: Serialize>(value: &T) -> ConflictableTransactionResult<Vec<u8>, Error> {
    serde_json::to_vec(value).map_err(|e| ConflictableTransactionError::Abort(e.into()))
}

fn read_count(meta: &TransactionalTree, key: &str) -> ConflictableTransactionResult<u64, Error> {
    Ok(meta
        .get(key)?
        .and_then(|bytes| <[u8; 8]>::try_from(bytes.as_ref()).ok())
        .map(u64::from_be_bytes)
        .unwrap_or(0))
}

fn write_count(meta: &TransactionalTree, key: &str, n: u64) -> ConflictableTransactionResult<(), Error> {
    meta.insert(key, n.to_be_bytes().to_vec())?;
    Ok(())
}

/// Sled-backed entity store.
///
/// Every entity kind lives in its own tree as a JSON document keyed by id.
/// Counters for generated ids live in a separate tree and only ever grow,
/// so ids are never reused after a delete.
///
/// Account writes run as transactions over the account tree, the email and
/// username indexes and the administrator counters, so uniqueness and the
/// "at least one active administrator" rule hold under concurrent requests.
/// Record writes keep the `verified` index (assignment id to record id) in
/// step, which allows one verified record per assignment.
#[derive(Clone)]
pub struct Storage {
    db: Db,
    accounts: Tree,
    credentials: Tree,
    emails: Tree,
    usernames: Tree,
    meta: Tree,
    routes: Tree,
    alerts: Tree,
    assignments: Tree,
    records: Tree,
    verified: Tree,
    pickups: Tree,
    counters: Tree,
}

impl Storage {
    /// Open or create the Sled database at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// In-memory database removed on drop; used by tests and demo mode
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self> {
        let storage = Self {
            accounts: db.open_tree("accounts")?,
            credentials: db.open_tree("credentials")?,
            emails: db.open_tree("account_emails")?,
            usernames: db.open_tree("account_usernames")?,
            meta: db.open_tree("meta")?,
            routes: db.open_tree("routes")?,
            alerts: db.open_tree("alerts")?,
            assignments: db.open_tree("assignments")?,
            records: db.open_tree("collection_records")?,
            verified: db.open_tree("verified_records")?,
            pickups: db.open_tree("pickups")?,
            counters: db.open_tree("counters")?,
            db,
        };
        storage.build_indexes()?;
        Ok(storage)
    }

    /// Fills the indexes of a store written before they existed.
    fn build_indexes(&self) -> Result<()> {
        if self.meta.contains_key(ADMINS)? {
            return Ok(());
        }
        let (mut admins, mut active_admins) = (0u64, 0u64);
        for account in Self::scan::<Account>(&self.accounts)? {
            self.emails.insert(index_key(&account.email).as_bytes(), account.id.as_bytes())?;
            if let Some(username) = &account.username {
                self.usernames.insert(index_key(username).as_bytes(), account.id.as_bytes())?;
            }
            if account.role == Role::Admin {
                admins += 1;
                if account.is_active() {
                    active_admins += 1;
                }
            }
        }
        for record in Self::scan::<CollectionRecord>(&self.records)? {
            if record.verification_status == VerificationStatus::Verified {
                self.verified
                    .insert(record.assignment_id.as_bytes(), record.id.to_string().as_bytes())?;
            }
        }
        self.meta.insert(ACTIVE_ADMINS, active_admins.to_be_bytes().to_vec())?;
        self.meta.insert(ADMINS, admins.to_be_bytes().to_vec())?;
        Ok(())
    }

    pub async fn flush(&self) -> Result<()> {
        self.db.flush_async().await?;
        Ok(())
    }

    /// Atomically bumps a sequence and returns the new value (first call → 1).
    pub fn next_sequence(&self, sequence: Sequence) -> Result<u64> {
        let value = self.counters.update_and_fetch(sequence.key(), |old| {
            let current = old
                .and_then(|bytes| <[u8; 8]>::try_from(bytes).ok())
                .map(u64::from_be_bytes)
                .unwrap_or(0);
            Some((current + 1).to_be_bytes().to_vec())
        })?;
        value
            .and_then(|bytes| <[u8; 8]>::try_from(bytes.as_ref()).ok())
            .map(u64::from_be_bytes)
            .ok_or_else(|| {
                Error::Storage(sled::Error::Unsupported(format!(
                    "counter {} unreadable",
                    sequence.key()
                )))
            })
    }

    pub fn next_id(&self, sequence: Sequence) -> Result<String> {
        Ok(format_id(sequence.prefix(), self.next_sequence(sequence)?))
    }

    /// Moves a sequence forward so it is at least `n`. Used when loading
    /// records that already carry ids.
    pub fn bump_sequence_to(&self, sequence: Sequence, n: u64) -> Result<()> {
        self.counters.update_and_fetch(sequence.key(), |old| {
            let current = old
                .and_then(|bytes| <[u8; 8]>::try_from(bytes).ok())
                .map(u64::from_be_bytes)
                .unwrap_or(0);
            Some(current.max(n).to_be_bytes().to_vec())
        })?;
        Ok(())
    }

    // --- generic JSON document helpers ---

    fn put<T: Serialize>(tree: &Tree, id: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        tree.insert(id.as_bytes(), bytes)?;
        Ok(())
    }

    fn fetch<T: DeserializeOwned>(tree: &Tree, id: &str) -> Result<Option<T>> {
        match tree.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(tree: &Tree) -> Result<Vec<T>> {
        let mut items = vec![];
        for item in tree.iter() {
            let (_, value) = item?;
            items.push(serde_json::from_slice(&value)?);
        }
        Ok(items)
    }

    /// Read-modify-write guarded by compare-and-swap; retried on contention.
    fn modify<T, F>(tree: &Tree, kind: &'static str, id: &str, mut f: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut(&mut T) -> Result<()>,
    {
        loop {
            let old = tree
                .get(id.as_bytes())?
                .ok_or_else(|| Error::not_found(kind, id))?;
            let mut value: T = serde_json::from_slice(&old)?;
            f(&mut value)?;
            let new = serde_json::to_vec(&value)?;
            match tree.compare_and_swap(id.as_bytes(), Some(old), Some(new))? {
                Ok(()) => return Ok(value),
                Err(_) => continue,
            }
        }
    }

    // --- accounts ---

    /// Stores a new account with its credentials. Fails with a conflict when
    /// the id, the email or the username is taken, and with `Forbidden` when
    /// `rule` is [`AdminRule::FirstOnly`] and an administrator exists.
    pub fn insert_account(&self, account: &Account, credentials: &Credentials, rule: AdminRule) -> Result<()> {
        let account_bytes = serde_json::to_vec(account)?;
        let credential_bytes = serde_json::to_vec(credentials)?;
        let email = index_key(&account.email);
        let username = account.username.as_deref().map(index_key);

        settle(
            (&self.accounts, &self.credentials, &self.emails, &self.usernames, &self.meta).transaction(
                |(accounts, creds, emails, usernames, meta)| {
                    if accounts.get(account.id.as_bytes())?.is_some() {
                        return abort(Error::Conflict(format!("Account {} already exists", account.id)));
                    }
                    if emails.get(email.as_bytes())?.is_some() {
                        return abort(Error::Conflict(EMAIL_TAKEN.to_string()));
                    }
                    if let Some(username) = &username {
                        if usernames.get(username.as_bytes())?.is_some() {
                            return abort(Error::Conflict(USERNAME_TAKEN.to_string()));
                        }
                        usernames.insert(username.as_bytes(), account.id.as_bytes())?;
                    }
                    if account.role == Role::Admin {
                        let admins = read_count(meta, ADMINS)?;
                        if rule == AdminRule::FirstOnly && admins > 0 {
                            return abort(Error::Forbidden);
                        }
                        write_count(meta, ADMINS, admins + 1)?;
                        if account.is_active() {
                            let active = read_count(meta, ACTIVE_ADMINS)?;
                            write_count(meta, ACTIVE_ADMINS, active + 1)?;
                        }
                    }
                    emails.insert(email.as_bytes(), account.id.as_bytes())?;
                    creds.insert(account.id.as_bytes(), credential_bytes.as_slice())?;
                    accounts.insert(account.id.as_bytes(), account_bytes.as_slice())?;
                    Ok(())
                },
            ),
        )
    }

    pub fn get_account(&self, id: &str) -> Result<Option<Account>> {
        Self::fetch(&self.accounts, id)
    }

    pub fn accounts(&self) -> Result<Vec<Account>> {
        let mut all: Vec<Account> = Self::scan(&self.accounts)?;
        all.sort_by_key(|a| (a.role.id_prefix(), id_number(&a.id)));
        Ok(all)
    }

    /// Applies `f` to an account. Email changes must stay unique and no
    /// change may deactivate the last active administrator. Id, role and
    /// username are fixed once stored.
    pub fn update_account<F>(&self, id: &str, f: F) -> Result<Account>
    where
        F: Fn(&mut Account) -> Result<()>,
    {
        settle((&self.accounts, &self.emails, &self.meta).transaction(|(accounts, emails, meta)| {
            let old: Account = match accounts.get(id.as_bytes())? {
                Some(bytes) => decode(&bytes)?,
                None => return abort(Error::not_found("account", id)),
            };
            let mut account = old.clone();
            if let Err(e) = f(&mut account) {
                return abort(e);
            }
            if account.id != old.id || account.role != old.role || account.username != old.username {
                return abort(Error::Conflict("Account id, role and username cannot change".to_string()));
            }

            let (old_email, new_email) = (index_key(&old.email), index_key(&account.email));
            if old_email != new_email {
                if emails.get(new_email.as_bytes())?.is_some() {
                    return abort(Error::Conflict(EMAIL_TAKEN.to_string()));
                }
                emails.remove(old_email.as_bytes())?;
                emails.insert(new_email.as_bytes(), id.as_bytes())?;
            }

            let (was_admin, is_admin) = (counts_as_active_admin(&old), counts_as_active_admin(&account));
            if was_admin != is_admin {
                let active = read_count(meta, ACTIVE_ADMINS)?;
                if was_admin && active <= 1 {
                    return abort(Error::Conflict(LAST_ADMIN.to_string()));
                }
                let active = if is_admin { active + 1 } else { active - 1 };
                write_count(meta, ACTIVE_ADMINS, active)?;
            }

            accounts.insert(id.as_bytes(), encode(&account)?)?;
            Ok(account)
        }))
    }

    /// Removes an account with its credentials and index entries. `Ok(None)`
    /// when there was nothing to delete.
    pub fn delete_account(&self, id: &str) -> Result<Option<Account>> {
        settle(
            (&self.accounts, &self.credentials, &self.emails, &self.usernames, &self.meta).transaction(
                |(accounts, creds, emails, usernames, meta)| {
                    let account: Account = match accounts.get(id.as_bytes())? {
                        Some(bytes) => decode(&bytes)?,
                        None => return Ok(None),
                    };
                    if account.role == Role::Admin {
                        if account.is_active() {
                            let active = read_count(meta, ACTIVE_ADMINS)?;
                            if active <= 1 {
                                return abort(Error::Conflict(LAST_ADMIN.to_string()));
                            }
                            write_count(meta, ACTIVE_ADMINS, active - 1)?;
                        }
                        let admins = read_count(meta, ADMINS)?;
                        write_count(meta, ADMINS, admins.saturating_sub(1))?;
                    }
                    emails.remove(index_key(&account.email).as_bytes())?;
                    if let Some(username) = &account.username {
                        usernames.remove(index_key(username).as_bytes())?;
                    }
                    creds.remove(id.as_bytes())?;
                    accounts.remove(id.as_bytes())?;
                    Ok(Some(account))
                },
            ),
        )
    }

    fn account_by_index(&self, index: &Tree, value: &str) -> Result<Option<Account>> {
        match index.get(index_key(value).as_bytes())? {
            Some(id) => self.get_account(&String::from_utf8_lossy(&id)),
            None => Ok(None),
        }
    }

    pub fn find_account_by_email(&self, email: &str) -> Result<Option<Account>> {
        self.account_by_index(&self.emails, email)
    }

    pub fn find_account_by_username(&self, username: &str) -> Result<Option<Account>> {
        self.account_by_index(&self.usernames, username)
    }

    /// Number of accounts with the admin role, active or not.
    pub fn admin_count(&self) -> Result<u64> {
        Ok(self
            .meta
            .get(ADMINS)?
            .and_then(|bytes| <[u8; 8]>::try_from(bytes.as_ref()).ok())
            .map(u64::from_be_bytes)
            .unwrap_or(0))
    }

    pub fn put_credentials(&self, credentials: &Credentials) -> Result<()> {
        Self::put(&self.credentials, &credentials.account_id, credentials)
    }

    pub fn get_credentials(&self, account_id: &str) -> Result<Option<Credentials>> {
        Self::fetch(&self.credentials, account_id)
    }

    // --- routes ---

    pub fn put_route(&self, route: &Route) -> Result<()> {
        Self::put(&self.routes, &route.id, route)
    }

    pub fn get_route(&self, id: &str) -> Result<Option<Route>> {
        Self::fetch(&self.routes, id)
    }

    pub fn routes(&self) -> Result<Vec<Route>> {
        let mut all: Vec<Route> = Self::scan(&self.routes)?;
        all.sort_by_key(|r| id_number(&r.id));
        Ok(all)
    }

    pub fn update_route<F>(&self, id: &str, f: F) -> Result<Route>
    where
        F: FnMut(&mut Route) -> Result<()>,
    {
        Self::modify(&self.routes, "route", id, f)
    }

    pub fn delete_route(&self, id: &str) -> Result<bool> {
        Ok(self.routes.remove(id.as_bytes())?.is_some())
    }

    // --- alerts ---

    pub fn put_alert(&self, alert: &Alert) -> Result<()> {
        Self::put(&self.alerts, &alert.id, alert)
    }

    pub fn alerts(&self) -> Result<Vec<Alert>> {
        Self::scan(&self.alerts)
    }

    pub fn update_alert<F>(&self, id: &str, f: F) -> Result<Alert>
    where
        F: FnMut(&mut Alert) -> Result<()>,
    {
        Self::modify(&self.alerts, "alert", id, f)
    }

    // --- assignments ---

    pub fn put_assignment(&self, assignment: &Assignment) -> Result<()> {
        Self::put(&self.assignments, &assignment.id, assignment)
    }

    pub fn get_assignment(&self, id: &str) -> Result<Option<Assignment>> {
        Self::fetch(&self.assignments, id)
    }

    pub fn assignments(&self) -> Result<Vec<Assignment>> {
        let mut all: Vec<Assignment> = Self::scan(&self.assignments)?;
        all.sort_by_key(|a| id_number(&a.id));
        Ok(all)
    }

    pub fn update_assignment<F>(&self, id: &str, f: F) -> Result<Assignment>
    where
        F: FnMut(&mut Assignment) -> Result<()>,
    {
        Self::modify(&self.assignments, "assignment", id, f)
    }

    // --- collection records ---

    pub fn put_record(&self, record: &CollectionRecord) -> Result<()> {
        Self::put(&self.records, &record.id.to_string(), record)
    }

    pub fn get_record(&self, id: &str) -> Result<Option<CollectionRecord>> {
        Self::fetch(&self.records, id)
    }

    pub fn records(&self) -> Result<Vec<CollectionRecord>> {
        let mut all: Vec<CollectionRecord> = Self::scan(&self.records)?;
        all.sort_by_key(|r| r.timestamp);
        Ok(all)
    }

    /// Applies `f` to a record. At most one record per assignment can be
    /// verified; a second one is refused with a conflict.
    pub fn update_record<F>(&self, id: &str, f: F) -> Result<CollectionRecord>
    where
        F: Fn(&mut CollectionRecord) -> Result<()>,
    {
        settle((&self.records, &self.verified).transaction(|(records, verified)| {
            let old: CollectionRecord = match records.get(id.as_bytes())? {
                Some(bytes) => decode(&bytes)?,
                None => return abort(Error::not_found("collection record", id)),
            };
            let mut record = old.clone();
            if let Err(e) = f(&mut record) {
                return abort(e);
            }
            if record.id != old.id || record.assignment_id != old.assignment_id {
                return abort(Error::Conflict("Collection record identity cannot change".to_string()));
            }

            let was_verified = old.verification_status == VerificationStatus::Verified;
            let is_verified = record.verification_status == VerificationStatus::Verified;
            let key = record.assignment_id.as_bytes();
            if is_verified && !was_verified {
                if verified.get(key)?.is_some() {
                    return abort(Error::Conflict(format!(
                        "Collection for assignment {} is already verified",
                        record.assignment_id
                    )));
                }
                verified.insert(key, id.as_bytes())?;
            } else if was_verified && !is_verified {
                verified.remove(key)?;
            }

            records.insert(id.as_bytes(), encode(&record)?)?;
            Ok(record)
        }))
    }

    /// Id of the verified record of an assignment, if any.
    pub fn verified_record_for(&self, assignment_id: &str) -> Result<Option<String>> {
        Ok(self
            .verified
            .get(assignment_id.as_bytes())?
            .map(|id| String::from_utf8_lossy(&id).into_owned()))
    }

    // --- scheduled pickups ---

    pub fn put_pickup(&self, pickup: &ScheduledPickup) -> Result<()> {
        Self::put(&self.pickups, &pickup.id, pickup)
    }

    pub fn pickups(&self) -> Result<Vec<ScheduledPickup>> {
        let mut all: Vec<ScheduledPickup> = Self::scan(&self.pickups)?;
        all.sort_by_key(|p| id_number(&p.id));
        Ok(all)
    }

    pub fn update_pickup<F>(&self, id: &str, f: F) -> Result<ScheduledPickup>
    where
        F: FnMut(&mut ScheduledPickup) -> Result<()>,
    {
        Self::modify(&self.pickups, "pickup", id, f)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{AccountStatus, PhotoSet, RouteStatus};
    use chrono::{NaiveDate, Utc};
    use std::thread;
    use uuid::Uuid;

    fn account(id: &str, role: Role) -> Account {
        let today = NaiveDate::from_ymd_opt(2024, 3, 24).unwrap();
        Account::new(id.to_string(), format!("Name {id}"), format!("{id}@example.com"), role, today)
    }

    /// Stores an account whose credentials cannot be used to log in.
    pub(crate) fn insert(storage: &Storage, account: &Account) {
        let credentials = Credentials {
            account_id: account.id.clone(),
            password_hash: String::new(),
            must_reset: true,
        };
        storage.insert_account(account, &credentials, AdminRule::Any).unwrap();
    }

    fn record(assignment_id: &str) -> CollectionRecord {
        CollectionRecord {
            id: Uuid::new_v4(),
            assignment_id: assignment_id.to_string(),
            customer_name: "Johnson Family".to_string(),
            address: "123 Main Street, Downtown".to_string(),
            waste_types: vec!["General Waste".to_string()],
            photos: PhotoSet::default(),
            weight: 0.0,
            signature: String::new(),
            timestamp: Utc::now(),
            notes: String::new(),
            customer_rating: 5,
            issues: vec![],
            verification_status: VerificationStatus::Pending,
        }
    }

    #[test]
    fn ids_are_prefixed_padded_and_never_reused() {
        let storage = Storage::temporary().expect("temporary storage");

        assert_eq!(storage.next_id(Sequence::Account(Role::Picker)).unwrap(), "WP001");
        assert_eq!(storage.next_id(Sequence::Account(Role::Picker)).unwrap(), "WP002");
        // independent per role
        assert_eq!(storage.next_id(Sequence::Account(Role::User)).unwrap(), "U001");
        assert_eq!(storage.next_id(Sequence::Route).unwrap(), "R001");

        storage.bump_sequence_to(Sequence::Route, 999).unwrap();
        assert_eq!(storage.next_id(Sequence::Route).unwrap(), "R1000");
        // bumping backwards is a no-op
        storage.bump_sequence_to(Sequence::Route, 5).unwrap();
        assert_eq!(storage.next_sequence(Sequence::Route).unwrap(), 1001);
    }

    #[test]
    fn id_number_orders_numerically() {
        assert_eq!(id_number("WP007"), 7);
        assert_eq!(id_number("R1000"), 1000);
        assert_eq!(id_number("AL010"), 10);
        assert_eq!(id_number("nodigits"), 0);
    }

    #[test]
    fn account_crud_and_lookup() {
        let storage = Storage::temporary().expect("temporary storage");
        let mut acc = account("U001", Role::User);
        acc.username = Some("johnny".to_string());
        insert(&storage, &acc);
        insert(&storage, &account("A001", Role::Admin));

        assert_eq!(storage.get_account("U001").unwrap(), Some(acc.clone()));
        assert!(storage.find_account_by_email("U001@EXAMPLE.com").unwrap().is_some());
        assert!(storage.find_account_by_username("JOHNNY").unwrap().is_some());
        assert!(storage.find_account_by_username("nobody").unwrap().is_none());

        let updated = storage
            .update_account("U001", |a| {
                a.status = AccountStatus::Inactive;
                Ok(())
            })
            .unwrap();
        assert_eq!(updated.status, AccountStatus::Inactive);
        assert_eq!(storage.get_account("U001").unwrap().unwrap().status, AccountStatus::Inactive);

        assert!(storage.delete_account("U001").unwrap().is_some());
        assert!(storage.delete_account("U001").unwrap().is_none());
        assert_eq!(storage.accounts().unwrap().len(), 1);
        // index entries went with the account
        assert!(storage.find_account_by_email("U001@example.com").unwrap().is_none());
        assert!(storage.find_account_by_username("johnny").unwrap().is_none());
    }

    #[test]
    fn email_and_username_stay_unique() {
        let storage = Storage::temporary().expect("temporary storage");
        let mut first = account("U001", Role::User);
        first.username = Some("johnny".to_string());
        insert(&storage, &first);

        let locked = |id: &str| Credentials {
            account_id: id.to_string(),
            password_hash: String::new(),
            must_reset: true,
        };
        let mut same_email = account("U002", Role::User);
        same_email.email = "u001@EXAMPLE.com".to_string();
        let err = storage.insert_account(&same_email, &locked("U002"), AdminRule::Any).unwrap_err();
        assert!(matches!(err, Error::Conflict(ref m) if m == EMAIL_TAKEN));

        let mut same_username = account("U003", Role::User);
        same_username.username = Some("JOHNNY".to_string());
        let err = storage.insert_account(&same_username, &locked("U003"), AdminRule::Any).unwrap_err();
        assert!(matches!(err, Error::Conflict(ref m) if m == USERNAME_TAKEN));
        // nothing half-written
        assert!(storage.get_account("U003").unwrap().is_none());
        assert!(storage.get_credentials("U003").unwrap().is_none());

        insert(&storage, &account("U004", Role::User));
        let err = storage
            .update_account("U004", |a| {
                a.email = "U001@example.com".to_string();
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(ref m) if m == EMAIL_TAKEN));

        // a changed email frees the old one
        storage
            .update_account("U001", |a| {
                a.email = "john.smith@example.com".to_string();
                Ok(())
            })
            .unwrap();
        assert_eq!(
            storage.find_account_by_email("john.smith@example.com").unwrap().unwrap().id,
            "U001"
        );
        let mut reuses_old = account("U005", Role::User);
        reuses_old.email = "u001@example.com".to_string();
        insert(&storage, &reuses_old);
    }

    #[test]
    fn concurrent_inserts_admit_one_email() {
        let storage = Storage::temporary().expect("temporary storage");
        let successes = thread::scope(|scope| {
            let handles: Vec<_> = (1..=8)
                .map(|n| {
                    let storage = storage.clone();
                    scope.spawn(move || {
                        let mut acc = account(&format!("U{n:03}"), Role::User);
                        acc.email = "same@example.com".to_string();
                        let credentials = Credentials {
                            account_id: acc.id.clone(),
                            password_hash: String::new(),
                            must_reset: true,
                        };
                        storage.insert_account(&acc, &credentials, AdminRule::Any).is_ok()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|ok| *ok)
                .count()
        });
        assert_eq!(successes, 1);
        let same = storage
            .accounts()
            .unwrap()
            .into_iter()
            .filter(|a| a.email == "same@example.com")
            .count();
        assert_eq!(same, 1);
    }

    #[test]
    fn concurrent_first_admin_bootstrap_admits_one() {
        let storage = Storage::temporary().expect("temporary storage");
        let successes = thread::scope(|scope| {
            let handles: Vec<_> = (1..=8)
                .map(|n| {
                    let storage = storage.clone();
                    scope.spawn(move || {
                        let acc = account(&format!("A{n:03}"), Role::Admin);
                        let credentials = Credentials {
                            account_id: acc.id.clone(),
                            password_hash: String::new(),
                            must_reset: true,
                        };
                        storage.insert_account(&acc, &credentials, AdminRule::FirstOnly).is_ok()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).filter(|ok| *ok).count()
        });
        assert_eq!(successes, 1);
        assert_eq!(storage.admin_count().unwrap(), 1);
    }

    #[test]
    fn concurrent_deactivation_keeps_one_active_admin() {
        let storage = Storage::temporary().expect("temporary storage");
        insert(&storage, &account("A001", Role::Admin));
        insert(&storage, &account("A002", Role::Admin));

        let results: Vec<bool> = thread::scope(|scope| {
            let handles: Vec<_> = ["A001", "A002"]
                .into_iter()
                .map(|id| {
                    let storage = storage.clone();
                    scope.spawn(move || {
                        storage
                            .update_account(id, |a| {
                                a.status = AccountStatus::Inactive;
                                Ok(())
                            })
                            .is_ok()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(results.iter().filter(|ok| **ok).count(), 1);
        let active = storage.accounts().unwrap().iter().filter(|a| a.is_active()).count();
        assert_eq!(active, 1);

        let last = storage.accounts().unwrap().into_iter().find(|a| a.is_active()).unwrap();
        let err = storage.delete_account(&last.id).unwrap_err();
        assert!(matches!(err, Error::Conflict(ref m) if m == LAST_ADMIN));
    }

    #[test]
    fn indexes_are_rebuilt_for_older_stores() {
        let storage = Storage::temporary().expect("temporary storage");
        // written directly, the way a store without indexes holds it
        let admin = account("A001", Role::Admin);
        Storage::put(&storage.accounts, &admin.id, &admin).unwrap();
        storage.meta.clear().unwrap();
        storage.emails.clear().unwrap();

        storage.build_indexes().unwrap();
        assert_eq!(storage.admin_count().unwrap(), 1);
        assert!(storage.find_account_by_email("a001@example.com").unwrap().is_some());
    }

    #[test]
    fn one_verified_record_per_assignment() {
        let storage = Storage::temporary().expect("temporary storage");
        let first = record("AS001");
        let second = record("AS001");
        storage.put_record(&first).unwrap();
        storage.put_record(&second).unwrap();

        let verify = |r: &mut CollectionRecord| -> Result<()> {
            r.verification_status = VerificationStatus::Verified;
            Ok(())
        };
        storage.update_record(&first.id.to_string(), verify).unwrap();
        assert_eq!(storage.verified_record_for("AS001").unwrap(), Some(first.id.to_string()));

        let err = storage.update_record(&second.id.to_string(), verify).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(
            storage.get_record(&second.id.to_string()).unwrap().unwrap().verification_status,
            VerificationStatus::Pending
        );

        // rejecting the verified one frees the slot
        storage
            .update_record(&first.id.to_string(), |r| {
                r.verification_status = VerificationStatus::Rejected;
                Ok(())
            })
            .unwrap();
        assert!(storage.verified_record_for("AS001").unwrap().is_none());
        storage.update_record(&second.id.to_string(), verify).unwrap();
    }

    #[test]
    fn modify_missing_entity_is_not_found() {
        let storage = Storage::temporary().expect("temporary storage");
        let err = storage.update_route("R404", |_| Ok(())).unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "route", .. }));
    }

    #[test]
    fn failed_modification_leaves_document_untouched() {
        let storage = Storage::temporary().expect("temporary storage");
        let route = Route {
            id: "R001".to_string(),
            name: "Downtown Circuit".to_string(),
            area: "Downtown".to_string(),
            picker_id: String::new(),
            picker_name: "Unassigned".to_string(),
            stops: 24,
            status: RouteStatus::Active,
            efficiency: 94,
            estimated_time: "4h 30m".to_string(),
        };
        storage.put_route(&route).unwrap();

        let result = storage.update_route("R001", |r| {
            r.efficiency = 0;
            Err(Error::Conflict("nope".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(storage.get_route("R001").unwrap().unwrap().efficiency, 94);
    }

    #[test]
    fn routes_list_in_numeric_id_order() {
        let storage = Storage::temporary().expect("temporary storage");
        for id in ["R010", "R002", "R1000"] {
            let route = Route {
                id: id.to_string(),
                name: id.to_string(),
                area: "Unassigned".to_string(),
                picker_id: String::new(),
                picker_name: "Unassigned".to_string(),
                stops: 10,
                status: RouteStatus::Paused,
                efficiency: 0,
                estimated_time: "TBD".to_string(),
            };
            storage.put_route(&route).unwrap();
        }
        let ids: Vec<String> = storage.routes().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["R002", "R010", "R1000"]);
    }
}
