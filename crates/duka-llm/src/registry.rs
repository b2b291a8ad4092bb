use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::info;

use crate::openai::OpenAiClient;
use crate::provider::LlmProvider;

/// Provider pool keyed by a hash of the credential tuple.
///
/// Clients are constructed lazily on first use and reused for every
/// subsequent request with the same credentials — constructing a fresh HTTP
/// client per request leaks connections under load. `clear` tears the pool
/// down when configuration changes.
pub struct ProviderRegistry {
    clients: Mutex<HashMap<String, Arc<dyn LlmProvider>>>,
    timeout: Duration,
}

impl ProviderRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    fn credential_key(base_url: &str, api_key: &str, model: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(base_url.as_bytes());
        hasher.update(b"\x00");
        hasher.update(api_key.as_bytes());
        hasher.update(b"\x00");
        hasher.update(model.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Get or lazily construct the client for a credential tuple.
    pub fn client(&self, base_url: &str, api_key: &str, model: &str) -> Arc<dyn LlmProvider> {
        let key = Self::credential_key(base_url, api_key, model);
        let mut clients = self.clients.lock().unwrap();
        if let Some(existing) = clients.get(&key) {
            return Arc::clone(existing);
        }
        info!(model, "constructing LLM client");
        let client: Arc<dyn LlmProvider> =
            Arc::new(OpenAiClient::new(base_url, api_key, model, self.timeout));
        clients.insert(key, Arc::clone(&client));
        client
    }

    /// Drop every pooled client. Called when LLM configuration changes.
    pub fn clear(&self) {
        self.clients.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_credentials_reuse_one_client() {
        let reg = ProviderRegistry::new(Duration::from_secs(5));
        let a = reg.client("https://api.example.com/v1", "sk-1", "m1");
        let b = reg.client("https://api.example.com/v1", "sk-1", "m1");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn different_credentials_get_distinct_clients() {
        let reg = ProviderRegistry::new(Duration::from_secs(5));
        let a = reg.client("https://api.example.com/v1", "sk-1", "m1");
        let b = reg.client("https://api.example.com/v1", "sk-2", "m1");
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn clear_tears_down_the_pool() {
        let reg = ProviderRegistry::new(Duration::from_secs(5));
        reg.client("https://api.example.com/v1", "sk-1", "m1");
        reg.clear();
        assert!(reg.is_empty());
    }
}
