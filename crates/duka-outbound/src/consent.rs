use duka_core::types::{ConsentCategory, MessageKind};
use duka_sessions::types::Customer;

use crate::error::DeliveryError;

/// Hard consent gate applied to every outbound send. Transactional messages
/// pass by definition (the category is non-revocable); everything else needs
/// the matching flag on the customer.
pub fn check(customer: &Customer, kind: MessageKind) -> Result<(), DeliveryError> {
    let category = kind.consent_category();
    if customer.has_consent(category) {
        Ok(())
    } else {
        Err(DeliveryError::ConsentDenied { category })
    }
}
