use crate::domain::identity::{MerchantCredentials, MerchantId};
use crate::domain::ports::MerchantDirectory;
use std::collections::HashMap;

/// Merchant credentials loaded once from configuration.
#[derive(Debug, Default, Clone)]
pub struct StaticMerchantDirectory {
    merchants: HashMap<MerchantId, MerchantCredentials>,
}

impl StaticMerchantDirectory {
    pub fn new(credentials: impl IntoIterator<Item = MerchantCredentials>) -> Self {
        Self {
            merchants: credentials
                .into_iter()
                .map(|c| (c.merchant_id.clone(), c))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.merchants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.merchants.is_empty()
    }
}

impl MerchantDirectory for StaticMerchantDirectory {
    fn credentials(&self, merchant_id: &MerchantId) -> Option<MerchantCredentials> {
        self.merchants.get(merchant_id).cloned()
    }
}
