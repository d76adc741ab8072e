//! JSON-RPC method dispatch.
//!
//! A request is `{"method": "lock.acquire", "params": {...}}`. Params are
//! camelCase and deserialized into a typed struct per method; a missing or
//! malformed field is reported as `INVALID_INPUT`.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Map, Value};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};
use substrate_core::{Action, Error, Result, Substrate};
use tracing::debug;

/// Every method the substrate answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
pub enum Method {
    #[strum(serialize = "session.init")]
    SessionInit,
    #[strum(serialize = "session.acknowledge")]
    SessionAcknowledge,
    #[strum(serialize = "session.heartbeat")]
    SessionHeartbeat,
    #[strum(serialize = "session.end")]
    SessionEnd,
    #[strum(serialize = "session.get")]
    SessionGet,
    #[strum(serialize = "session.list")]
    SessionList,
    #[strum(serialize = "substrate.check")]
    Check,
    #[strum(serialize = "lock.acquire")]
    LockAcquire,
    #[strum(serialize = "lock.release")]
    LockRelease,
    #[strum(serialize = "lock.list")]
    LockList,
    #[strum(serialize = "lock.validate")]
    LockValidate,
    #[strum(serialize = "claim.create")]
    ClaimCreate,
    #[strum(serialize = "claim.release")]
    ClaimRelease,
    #[strum(serialize = "claim.list")]
    ClaimList,
    #[strum(serialize = "claim.handoff")]
    ClaimHandoff,
    #[strum(serialize = "zone.set")]
    ZoneSet,
    #[strum(serialize = "zone.delete")]
    ZoneDelete,
    #[strum(serialize = "zone.list")]
    ZoneList,
    #[strum(serialize = "zone.check")]
    ZoneCheck,
    #[strum(serialize = "rules.get")]
    RulesGet,
    #[strum(serialize = "rules.patch")]
    RulesPatch,
    #[strum(serialize = "violations.list")]
    ViolationsList,
}

impl Method {
    /// All method names, in declaration order.
    pub fn names() -> Vec<String> {
        Self::iter().map(|m| m.to_string()).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentParams {
    agent_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitParams {
    agent_id: String,
    role: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckParams {
    agent_id: String,
    action: Action,
    target: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockParams {
    resource_path: String,
    agent_id: String,
    reason: Option<String>,
    resource_type: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct ListParams {
    include_stale: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValidateParams {
    target: String,
    agent_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClaimParams {
    what: String,
    agent_id: String,
    description: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HandoffParams {
    what: String,
    from_agent: String,
    to_agent: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ZoneParams {
    zone_id: String,
    path: String,
    owner: String,
    description: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ZoneIdParams {
    zone_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RulesPatchParams {
    section: String,
    updates: Value,
    admin_key: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct ViolationsParams {
    limit: Option<u32>,
    agent_id: Option<String>,
}

fn params<T: DeserializeOwned>(value: Value) -> Result<T> {
    let value = match value {
        Value::Null => Value::Object(Map::new()),
        other => other,
    };
    serde_json::from_value(value).map_err(|e| Error::InvalidInput(format!("Invalid params: {e}")))
}

fn to_object<T: Serialize>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Execute one request against the substrate, returning the response data.
pub async fn dispatch(substrate: &Substrate, request: RpcRequest) -> Result<Value> {
    let method: Method = request
        .method
        .parse()
        .map_err(|_| Error::InvalidInput(format!("Unknown method '{}'", request.method)))?;
    debug!(%method, "dispatching");
    let p = request.params;

    match method {
        Method::SessionInit => {
            let p: InitParams = params(p)?;
            to_object(&substrate.init_session(&p.agent_id, &p.role).await?)
        }
        Method::SessionAcknowledge => {
            let p: AgentParams = params(p)?;
            let session = substrate.acknowledge(&p.agent_id).await?;
            Ok(json!({ "session": session }))
        }
        Method::SessionHeartbeat => {
            let p: AgentParams = params(p)?;
            let last_activity = substrate.heartbeat(&p.agent_id).await?;
            Ok(json!({ "agentId": p.agent_id, "lastActivity": last_activity }))
        }
        Method::SessionEnd => {
            let p: AgentParams = params(p)?;
            to_object(&substrate.end_session(&p.agent_id).await?)
        }
        Method::SessionGet => {
            let p: AgentParams = params(p)?;
            let session = substrate.get_session(&p.agent_id).await?;
            Ok(json!({ "session": session }))
        }
        Method::SessionList => {
            let sessions = substrate.list_sessions().await?;
            Ok(json!({ "sessions": sessions }))
        }
        Method::Check => {
            let p: CheckParams = params(p)?;
            to_object(
                &substrate
                    .check(&p.agent_id, p.action, p.target.as_deref())
                    .await?,
            )
        }
        Method::LockAcquire => {
            let p: LockParams = params(p)?;
            to_object(
                &substrate
                    .acquire_lock(
                        &p.resource_path,
                        &p.agent_id,
                        p.reason.as_deref(),
                        p.resource_type.as_deref(),
                    )
                    .await?,
            )
        }
        Method::LockRelease => {
            let p: LockParams = params(p)?;
            to_object(&substrate.release_lock(&p.resource_path, &p.agent_id).await?)
        }
        Method::LockList => {
            let p: ListParams = params(p)?;
            let locks = substrate.list_locks(p.include_stale).await?;
            Ok(json!({ "locks": locks }))
        }
        Method::LockValidate => {
            let p: ValidateParams = params(p)?;
            to_object(&substrate.validate_lock(&p.target, &p.agent_id).await?)
        }
        Method::ClaimCreate => {
            let p: ClaimParams = params(p)?;
            to_object(
                &substrate
                    .create_claim(&p.what, &p.agent_id, p.description.as_deref())
                    .await?,
            )
        }
        Method::ClaimRelease => {
            let p: ClaimParams = params(p)?;
            to_object(&substrate.release_claim(&p.what, &p.agent_id).await?)
        }
        Method::ClaimList => {
            let p: ListParams = params(p)?;
            let claims = substrate.list_claims(p.include_stale).await?;
            Ok(json!({ "claims": claims }))
        }
        Method::ClaimHandoff => {
            let p: HandoffParams = params(p)?;
            let claim = substrate
                .handoff_claim(&p.what, &p.from_agent, &p.to_agent)
                .await?;
            Ok(json!({ "claim": claim }))
        }
        Method::ZoneSet => {
            let p: ZoneParams = params(p)?;
            let zone = substrate
                .set_zone(&p.zone_id, &p.path, &p.owner, p.description.as_deref())
                .await?;
            Ok(json!({ "zone": zone }))
        }
        Method::ZoneDelete => {
            let p: ZoneIdParams = params(p)?;
            let deleted = substrate.delete_zone(&p.zone_id).await?;
            Ok(json!({ "zoneId": p.zone_id, "deleted": deleted }))
        }
        Method::ZoneList => {
            let zones = substrate.list_zones().await?;
            Ok(json!({ "zones": zones }))
        }
        Method::ZoneCheck => {
            let p: ValidateParams = params(p)?;
            to_object(&substrate.check_zone(&p.target, &p.agent_id).await?)
        }
        Method::RulesGet => {
            let rules = substrate.rules().await?;
            Ok(json!({ "rules": rules }))
        }
        Method::RulesPatch => {
            let p: RulesPatchParams = params(p)?;
            let rules = substrate
                .patch_rules(&p.section, &p.updates, p.admin_key.as_deref())
                .await?;
            Ok(json!({ "rules": rules }))
        }
        Method::ViolationsList => {
            let p: ViolationsParams = params(p)?;
            let violations = substrate
                .violations(p.limit, p.agent_id.as_deref())
                .await?;
            Ok(json!({ "violations": violations }))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{str::FromStr, sync::Arc};

    use substrate_core::{Settings, Store, SystemClock};

    use super::*;

    async fn substrate() -> Result<Substrate> {
        let store = Store::open_in_memory().await?;
        Ok(Substrate::new(store, Arc::new(SystemClock), Settings::default()))
    }

    fn request(method: &str, params: Value) -> RpcRequest {
        RpcRequest {
            method: method.to_string(),
            params,
        }
    }

    #[test]
    fn test_method_names_parse_back() {
        for name in Method::names() {
            assert!(Method::from_str(&name).is_ok(), "{name} should parse");
        }
        assert_eq!(Method::names().len(), 22);
    }

    #[tokio::test]
    async fn test_unknown_method_is_invalid_input() -> Result<()> {
        let sub = substrate().await?;
        let result = dispatch(&sub, request("lock.steal", Value::Null)).await;
        assert!(matches!(result, Err(Error::InvalidInput(ref m)) if m.contains("lock.steal")));
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_field_is_invalid_input() -> Result<()> {
        let sub = substrate().await?;
        let result = dispatch(&sub, request("session.init", json!({"agentId": "a"}))).await;
        assert!(matches!(result, Err(Error::InvalidInput(ref m)) if m.contains("role")));
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_action_is_invalid_input() -> Result<()> {
        let sub = substrate().await?;
        let result = dispatch(
            &sub,
            request(
                "substrate.check",
                json!({"agentId": "a", "action": "file-rename", "target": "x"}),
            ),
        )
        .await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_lock_round_trip_over_rpc() -> Result<()> {
        let sub = substrate().await?;
        let acquired = dispatch(
            &sub,
            request(
                "lock.acquire",
                json!({"resourcePath": "src/x.ts", "agentId": "A", "reason": "edit"}),
            ),
        )
        .await?;
        assert_eq!(acquired["granted"], json!(true));
        assert_eq!(acquired["lock"]["lockedBy"], json!("A"));
        assert_eq!(acquired["lock"]["resourceType"], json!("file-lock"));

        let listed = dispatch(&sub, request("lock.list", Value::Null)).await?;
        assert_eq!(listed["locks"].as_array().map(Vec::len), Some(1));

        let verdict = dispatch(
            &sub,
            request(
                "substrate.check",
                json!({"agentId": "B", "action": "file-edit", "target": "src/x.ts"}),
            ),
        )
        .await?;
        assert_eq!(verdict["allowed"], json!(false));
        assert!(verdict["violations"][0]
            .as_str()
            .is_some_and(|m| m.contains("locked by A")));
        Ok(())
    }

    #[tokio::test]
    async fn test_session_lifecycle_over_rpc() -> Result<()> {
        let sub = substrate().await?;
        let init = dispatch(
            &sub,
            request("session.init", json!({"agentId": "A", "role": "developer"})),
        )
        .await?;
        assert_eq!(init["requiresAcknowledgment"], json!(true));
        assert!(init["rulesSummary"].as_array().is_some_and(|l| !l.is_empty()));

        let acked = dispatch(&sub, request("session.acknowledge", json!({"agentId": "A"}))).await?;
        assert_eq!(acked["session"]["rulesAcknowledged"], json!(true));

        let end = dispatch(&sub, request("session.end", json!({"agentId": "A"}))).await?;
        assert!(end["recommendation"].is_string());

        let again = dispatch(&sub, request("session.heartbeat", json!({"agentId": "A"}))).await;
        assert!(matches!(again, Err(Error::NotFound(_))));
        Ok(())
    }
}
