// [apps/controller/src/services/effectuation.rs]
//! Enable/Disable effectuation (§4.7): reconciles the store's `enabled`
//! column with the node's live roster surface. The store write happens
//! first inside its own transaction; the `ExternalRoster` mutation happens
//! second, best-effort — on external failure the store is not rolled back,
//! the error is just reported, and the next `RosterReconciler` pass
//! realigns the two surfaces (eventual consistency, as the spec directs).

use controller_domain::capabilities::{ExternalRoster, RosterMutation};
use controller_store::StoreManager;

/// Moves `(node, username)` to `enabled`, updating the store first and then
/// asking `roster` to effectuate the matching shadow-list mutation. A
/// roster failure is logged and swallowed, not returned — the function
/// only reports a `StoreError` from the first step; the external mutation
/// is best-effort and the store write is never undone because of it
/// (§4.7's explicit eventual-consistency tradeoff, realigned by the next
/// `RosterReconciler` pass). Callers cannot distinguish "store committed,
/// roster also applied" from "store committed, roster rejected" from the
/// return value alone.
pub async fn set_enabled_effectuated(
    manager: &StoreManager,
    roster: &dyn ExternalRoster,
    node: &str,
    username: &str,
    enabled: bool,
    hot_restart: bool,
) -> Result<(), controller_store::StoreError> {
    let node_owned = node.to_string();
    let username_owned = username.to_string();
    manager
        .execute_high(move |handle| {
            let node = node_owned.clone();
            let username = username_owned.clone();
            async move { handle.set_enabled(&node, &username, enabled).await }
        })
        .await?;

    let mutation = if enabled {
        RosterMutation::Enable
    } else {
        RosterMutation::Disable
    };

    if let Err(err) = roster.apply(node, username, mutation, hot_restart).await {
        tracing::warn!(
            node,
            username,
            "external roster mutation failed after store commit, will realign on next reconciliation: {err}"
        );
    }

    Ok(())
}
