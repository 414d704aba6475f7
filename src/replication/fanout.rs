//! Replication fan-out
//!
//! Version 1 shards ship each batch to every follower concurrently and wait
//! for all answers before looking at any of them:
//! - a clean 200/201/202 answer keeps the follower
//! - anything else drops the follower from the shard's follower metadata
//! - a follower that answers "leader refuses replication" believes it leads
//!   the shard now; the whole operation then fails with `LeaderResigned`
//! - failing to drop a follower fails the operation (`LeaderResigned` if we
//!   lost leadership, `CouldNotDropFollower` otherwise)
//!
//! Version 2 shards hand the batch to the replicated log instead.

use futures_util::future::join_all;
use rand::Rng;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::timeout::choose_timeout;
use crate::cluster::{ReplicatedOperation, ReplicationRequest, ReplicationResponse, RequestVerb};
use crate::collection::{LogicalCollection, ReplicationVersion};
use crate::database::Database;
use crate::error::{ErrorCode, WriteError, WriteResult};
use crate::failure_point::points;
use crate::observability::{log_event, Event};
use crate::storage::TransactionId;
use crate::transaction::{OperationKind, OperationOptions, OverwriteMode, RefillIndexCaches};

/// Timeout of truncate requests to followers
pub const TRUNCATE_REPLICATION_TIMEOUT: Duration = Duration::from_secs(600);

/// Maximum randomized timeout, in seconds
const RANDOM_TIMEOUT_SECS: u64 = 60;

/// Replicate the payload of one successful call to the followers.
///
/// `payload` holds one entry per written document: the sanitized post-image
/// for insert/update/replace, `{_key, _rev}` for remove.
pub async fn replicate_operations(
    database: &Database,
    collection: &LogicalCollection,
    trx: TransactionId,
    followers: &Arc<Vec<String>>,
    options: &OperationOptions,
    payload: &[Value],
    kind: OperationKind,
) -> WriteResult<()> {
    if collection.replication_version() == ReplicationVersion::Two {
        return replicate_to_log(database, collection, trx, kind, Value::from(payload.to_vec())).await;
    }

    let body = Value::Array(payload.to_vec());
    let total_bytes = serde_json::to_vec(&body).map(|b| b.len()).unwrap_or(0);
    let mut timeout = choose_timeout(
        &database.config().replication_timeouts,
        payload.len(),
        total_bytes,
    );
    if database
        .failure_points()
        .is_enabled(points::RANDOMIZE_REPLICATION_TIMEOUT)
    {
        timeout = Duration::from_secs(rand::thread_rng().gen_range(1..=RANDOM_TIMEOUT_SECS));
    }

    let (verb, params) = document_request(kind, options);
    let template = RequestTemplate {
        verb,
        path: format!("/_db/{}/_api/document/{}", database.name(), collection.name()),
        params,
        body,
        timeout,
    };

    if database
        .failure_points()
        .is_enabled(points::DROP_FOLLOWER_BEFORE_SENDING)
    {
        for follower in followers.iter() {
            if let Err(e) = collection.follower_info().remove(follower) {
                log_event(
                    Event::FollowerDropFailed,
                    &[("error", e.message()), ("follower", follower)],
                );
            }
        }
    }

    let started = Instant::now();
    let responses = send_all(database, collection, followers, &template).await;
    database
        .metrics()
        .record_synchronous_replication(payload.len() as u64, started.elapsed());

    let refused = handle_responses(
        database,
        collection,
        followers,
        &responses,
        kind.as_str(),
        payload.len(),
        ReplicationResponse::is_success,
    )?;
    if refused {
        return Err(WriteError::leader_resigned());
    }
    database.intermediate_commit_if_required(trx).await
}

/// Replicate a truncate to the followers.
pub async fn replicate_truncate(
    database: &Database,
    collection: &LogicalCollection,
    trx: TransactionId,
    followers: &Arc<Vec<String>>,
    options: &OperationOptions,
) -> WriteResult<()> {
    if collection.replication_version() == ReplicationVersion::Two {
        let body = json!({ "collection": collection.name() });
        return replicate_to_log(database, collection, trx, OperationKind::Truncate, body).await;
    }
    if followers.is_empty() {
        return Ok(());
    }

    let mut params = BTreeMap::new();
    params.insert("compact".to_string(), options.truncate_compact.to_string());
    let template = RequestTemplate {
        verb: RequestVerb::Put,
        path: format!(
            "/_db/{}/_api/collection/{}/truncate",
            database.name(),
            collection.name()
        ),
        params,
        body: json!({}),
        timeout: TRUNCATE_REPLICATION_TIMEOUT,
    };

    let responses = send_all(database, collection, followers, &template).await;
    let refused = handle_responses(
        database,
        collection,
        followers,
        &responses,
        OperationKind::Truncate.as_str(),
        0,
        |r: &ReplicationResponse| matches!(r.status, 200 | 202) && r.error.is_none(),
    )?;
    if refused {
        return Err(WriteError::leader_resigned());
    }
    Ok(())
}

async fn replicate_to_log(
    database: &Database,
    collection: &LogicalCollection,
    trx: TransactionId,
    kind: OperationKind,
    payload: Value,
) -> WriteResult<()> {
    let log = database.replicated_log().ok_or_else(|| {
        WriteError::new(
            ErrorCode::ReplicatedStateNotAvailable,
            "could not get replicated state",
        )
    })?;
    let started = Instant::now();
    let count = payload.as_array().map_or(1, Vec::len) as u64;
    log.replicate(ReplicatedOperation {
        kind,
        shard: collection.name().to_string(),
        trx,
        payload,
    })
    .await?;
    database
        .metrics()
        .record_synchronous_replication(count, started.elapsed());
    Ok(())
}

struct RequestTemplate {
    verb: RequestVerb,
    path: String,
    params: BTreeMap<String, String>,
    body: Value,
    timeout: Duration,
}

/// Verb and parameters of a document replication request.
///
/// Updates go out as replaces so followers store the exact post-image.
fn document_request(kind: OperationKind, options: &OperationOptions) -> (RequestVerb, BTreeMap<String, String>) {
    let mut params = BTreeMap::new();
    params.insert("isRestore".to_string(), "true".to_string());
    match options.refill_index_caches {
        RefillIndexCaches::Default => {}
        RefillIndexCaches::Refill => {
            params.insert("refillIndexCaches".to_string(), "true".to_string());
        }
        RefillIndexCaches::DontRefill => {
            params.insert("refillIndexCaches".to_string(), "false".to_string());
        }
    }
    let verb = match kind {
        OperationKind::Insert => {
            let mode = match options.overwrite_mode {
                OverwriteMode::Conflict => None,
                OverwriteMode::Update | OverwriteMode::Replace => Some(OverwriteMode::Replace),
                OverwriteMode::Ignore => Some(OverwriteMode::Ignore),
            };
            if let Some(mode) = mode {
                params.insert("overwriteMode".to_string(), mode.as_str().to_string());
            }
            RequestVerb::Post
        }
        OperationKind::Update | OperationKind::Replace => RequestVerb::Put,
        OperationKind::Remove => RequestVerb::Delete,
        OperationKind::Read | OperationKind::Count | OperationKind::Truncate => RequestVerb::Put,
    };
    (verb, params)
}

/// Leader identity as sent to a follower: `SERVER` or `SERVER_TERM`.
fn leader_identity(database: &Database, collection: &LogicalCollection, follower: &str) -> String {
    match collection.follower_info().following_term_id(follower) {
        0 => database.server().id().to_string(),
        term => format!("{}_{}", database.server().id(), term),
    }
}

/// Send one request per follower and wait for every answer.
async fn send_all(
    database: &Database,
    collection: &LogicalCollection,
    followers: &Arc<Vec<String>>,
    template: &RequestTemplate,
) -> Vec<WriteResult<ReplicationResponse>> {
    let Some(transport) = database.transport() else {
        return followers
            .iter()
            .map(|_| Err(WriteError::from_code(ErrorCode::BackendUnavailable)))
            .collect();
    };

    let requests = followers.iter().map(|follower| {
        let mut params = template.params.clone();
        params.insert(
            "isSynchronousReplication".to_string(),
            leader_identity(database, collection, follower),
        );
        log_event(
            Event::ReplicationSent,
            &[
                ("follower", follower),
                ("path", &template.path),
                ("verb", &template.verb.to_string()),
            ],
        );
        transport.send(ReplicationRequest {
            destination: follower.clone(),
            verb: template.verb,
            path: template.path.clone(),
            params,
            body: template.body.clone(),
            timeout: template.timeout,
        })
    });
    join_all(requests).await
}

/// Drop every follower that did not succeed.
///
/// Returns whether any follower refused because it believes it leads.
fn handle_responses<F>(
    database: &Database,
    collection: &LogicalCollection,
    followers: &Arc<Vec<String>>,
    responses: &[WriteResult<ReplicationResponse>],
    operation: &str,
    count: usize,
    succeeded: F,
) -> WriteResult<bool>
where
    F: Fn(&ReplicationResponse) -> bool,
{
    let shard = format!("{}/{}", database.name(), collection.name());
    let drop_all = database.failure_points().is_enabled(points::DROP_FOLLOWER);
    let mut refused = false;

    for (follower, response) in followers.iter().zip(responses) {
        let mut reason = match response {
            Ok(r) if succeeded(r) => None,
            Ok(r) if r.error.is_none() && r.error_codes.is_some() => Some(format!(
                "got error header from follower: {}",
                error_codes_header(r)
            )),
            Ok(r) => {
                let message = r
                    .error
                    .as_ref()
                    .map(|e| e.message().to_string())
                    .unwrap_or_else(|| format!("status {}", r.status));
                if r.error_code() == Some(ErrorCode::ShardLeaderRefusesReplication) {
                    refused = true;
                    database.metrics().increment_followers_refused();
                    log_event(
                        Event::FollowerRefused,
                        &[
                            ("follower", follower),
                            ("message", &message),
                            ("operation", operation),
                            ("shard", &shard),
                        ],
                    );
                }
                Some(format!("got error from follower: {}", message))
            }
            Err(_) => Some("no response from follower".to_string()),
        };
        if drop_all {
            reason = Some("intentional debug error".to_string());
        }
        let Some(reason) = reason else {
            continue;
        };

        if database.server().is_stopping() {
            log_event(
                Event::ReplicationShutdown,
                &[("follower", follower), ("operation", operation), ("shard", &shard)],
            );
            return Err(WriteError::from_code(ErrorCode::ShuttingDown));
        }

        log_event(
            Event::FollowerDropped,
            &[
                ("count", &count.to_string()),
                ("follower", follower),
                ("operation", operation),
                ("reason", &reason),
                ("shard", &shard),
            ],
        );
        match collection.follower_info().remove(follower) {
            Ok(_) => database.metrics().increment_followers_dropped(),
            Err(e) => {
                log_event(
                    Event::FollowerDropFailed,
                    &[
                        ("error", e.message()),
                        ("follower", follower),
                        ("shard", &shard),
                    ],
                );
                return Err(if e.code() == ErrorCode::NotLeader {
                    WriteError::leader_resigned()
                } else {
                    WriteError::from_code(ErrorCode::CouldNotDropFollower)
                });
            }
        }
    }
    Ok(refused)
}

fn error_codes_header(response: &ReplicationResponse) -> String {
    let codes: BTreeMap<String, usize> = response
        .error_codes
        .iter()
        .flatten()
        .map(|(code, n)| (code.number().to_string(), *n))
        .collect();
    serde_json::to_string(&codes).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_is_sent_as_replace() {
        let options = OperationOptions::default();
        assert_eq!(document_request(OperationKind::Update, &options).0, RequestVerb::Put);
        assert_eq!(document_request(OperationKind::Replace, &options).0, RequestVerb::Put);
        assert_eq!(document_request(OperationKind::Remove, &options).0, RequestVerb::Delete);
    }

    #[test]
    fn test_insert_overwrite_mode_parameters() {
        let mut options = OperationOptions::default();
        let (verb, params) = document_request(OperationKind::Insert, &options);
        assert_eq!(verb, RequestVerb::Post);
        assert_eq!(params.get("isRestore").map(String::as_str), Some("true"));
        assert!(!params.contains_key("overwriteMode"));

        options.overwrite_mode = OverwriteMode::Update;
        let (_, params) = document_request(OperationKind::Insert, &options);
        assert_eq!(params.get("overwriteMode").map(String::as_str), Some("replace"));

        options.overwrite_mode = OverwriteMode::Ignore;
        options.refill_index_caches = RefillIndexCaches::DontRefill;
        let (_, params) = document_request(OperationKind::Insert, &options);
        assert_eq!(params.get("overwriteMode").map(String::as_str), Some("ignore"));
        assert_eq!(params.get("refillIndexCaches").map(String::as_str), Some("false"));
    }

    #[test]
    fn test_error_codes_header_uses_numbers() {
        let mut response = ReplicationResponse::ok(202);
        response.error_codes = Some(BTreeMap::from([(ErrorCode::Conflict, 2)]));
        assert_eq!(error_codes_header(&response), r#"{"1200":2}"#);
    }
}
