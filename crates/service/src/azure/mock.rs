//! In-memory Azure used by tests and local runs.
//!
//! Accounts and shares live in a shared map; every call is counted and any
//! operation can be made to fail on demand.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{GatewayError, GatewayFactory, StorageAccount, StorageAccountGateway};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Op {
    Exists,
    CreateAccount,
    DeleteAccount,
    HasShare,
    CreateShare,
    DeleteShare,
    ShareUrl,
    AccessKey,
}

#[derive(Default)]
struct AzureState {
    accounts: BTreeMap<String, BTreeSet<String>>,
    calls: BTreeMap<Op, usize>,
    failing: BTreeSet<Op>,
    stalled: BTreeSet<Op>,
}

#[derive(Clone, Default)]
pub struct InMemoryAzure {
    state: Arc<Mutex<AzureState>>,
}

impl InMemoryAzure {
    pub fn new() -> Self { Self::default() }

    pub fn with_account(self, account: &str) -> Self {
        self.state.lock().unwrap().accounts.entry(account.to_string()).or_default();
        self
    }

    pub fn with_share(self, account: &str, share: &str) -> Self {
        self.state.lock().unwrap().accounts.entry(account.to_string()).or_default().insert(share.to_string());
        self
    }

    pub fn account_exists(&self, account: &str) -> bool {
        self.state.lock().unwrap().accounts.contains_key(account)
    }

    pub fn share_exists(&self, account: &str, share: &str) -> bool {
        self.state.lock().unwrap().accounts.get(account).is_some_and(|s| s.contains(share))
    }

    pub fn calls(&self, op: Op) -> usize {
        self.state.lock().unwrap().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.state.lock().unwrap().calls.values().sum()
    }

    pub fn fail(&self, op: Op) {
        self.state.lock().unwrap().failing.insert(op);
    }

    pub fn recover(&self, op: Op) {
        self.state.lock().unwrap().failing.remove(&op);
    }

    /// Calls to `op` never complete.
    pub fn stall(&self, op: Op) {
        self.state.lock().unwrap().stalled.insert(op);
    }
}

impl GatewayFactory for InMemoryAzure {
    fn connect(&self, account: &StorageAccount) -> Result<Arc<dyn StorageAccountGateway>, GatewayError> {
        if account.storage_account_name.is_empty() {
            return Err(GatewayError::InvalidAccount("storage account name is empty".into()));
        }
        Ok(Arc::new(InMemoryAccount { state: Arc::clone(&self.state), account: account.storage_account_name.clone() }))
    }
}

struct InMemoryAccount {
    state: Arc<Mutex<AzureState>>,
    account: String,
}

impl InMemoryAccount {
    /// Yields once so concurrent callers interleave like real network calls,
    /// then records the call and applies any injected failure.
    async fn enter(&self, op: Op) -> Result<std::sync::MutexGuard<'_, AzureState>, GatewayError> {
        tokio::task::yield_now().await;
        let stalled = self.state.lock().unwrap().stalled.contains(&op);
        if stalled {
            std::future::pending::<()>().await;
        }
        let mut state = self.state.lock().unwrap();
        *state.calls.entry(op).or_default() += 1;
        if state.failing.contains(&op) {
            return Err(GatewayError::Request(format!("injected {op:?} failure")));
        }
        Ok(state)
    }

    fn not_found(&self) -> GatewayError {
        GatewayError::Request(format!("StatusCode=404 storage account {:?} not found", self.account))
    }
}

#[async_trait]
impl StorageAccountGateway for InMemoryAccount {
    async fn exists(&self) -> Result<bool, GatewayError> {
        let state = self.enter(Op::Exists).await?;
        Ok(state.accounts.contains_key(&self.account))
    }

    async fn create(&self) -> Result<(), GatewayError> {
        let mut state = self.enter(Op::CreateAccount).await?;
        state.accounts.entry(self.account.clone()).or_default();
        Ok(())
    }

    async fn delete(&self) -> Result<(), GatewayError> {
        let mut state = self.enter(Op::DeleteAccount).await?;
        state.accounts.remove(&self.account);
        Ok(())
    }

    async fn has_share(&self, name: &str) -> Result<bool, GatewayError> {
        let state = self.enter(Op::HasShare).await?;
        let shares = state.accounts.get(&self.account).ok_or_else(|| self.not_found())?;
        Ok(shares.contains(name))
    }

    async fn create_share(&self, name: &str) -> Result<(), GatewayError> {
        let mut state = self.enter(Op::CreateShare).await?;
        let shares = state.accounts.get_mut(&self.account).ok_or_else(|| self.not_found())?;
        if !shares.insert(name.to_string()) {
            return Err(GatewayError::Request(format!("share {name:?} already exists")));
        }
        Ok(())
    }

    async fn delete_share(&self, name: &str) -> Result<(), GatewayError> {
        let mut state = self.enter(Op::DeleteShare).await?;
        let shares = state.accounts.get_mut(&self.account).ok_or_else(|| self.not_found())?;
        if !shares.remove(name) {
            return Err(GatewayError::Request(format!("share {name:?} not found")));
        }
        Ok(())
    }

    async fn share_url(&self, name: &str) -> Result<String, GatewayError> {
        let state = self.enter(Op::ShareUrl).await?;
        if !state.accounts.contains_key(&self.account) {
            return Err(self.not_found());
        }
        Ok(format!("//{}.file.core.windows.net/{}", self.account, name))
    }

    async fn access_key(&self) -> Result<String, GatewayError> {
        let state = self.enter(Op::AccessKey).await?;
        if !state.accounts.contains_key(&self.account) {
            return Err(self.not_found());
        }
        Ok(format!("key-{}", self.account))
    }
}
