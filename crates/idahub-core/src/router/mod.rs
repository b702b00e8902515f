//! Request routing to a single addressed backend.
//!
//! Every routed call must name its target with an `instance_id` argument.
//! There is no fallback to the active instance: several independent callers
//! can share one registry, and a guessed target is worse than an error that
//! lists the real choices.

use crate::backend::BackendClient;
use crate::config::{RegistryConfig, RouterConfig};
use crate::registry::{ExpiredRecord, Instance, InstanceRegistry, InstanceSummary};
use crate::{HubError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Router tuning.
#[derive(Debug, Clone, Copy)]
pub struct RouterOptions {
    /// How long a binary identity check is reused per instance.
    pub identity_ttl: Duration,
    /// Upper bound on a forwarded call.
    pub forward_timeout: Duration,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            identity_ttl: RouterConfig::IDENTITY_CACHE_TTL,
            forward_timeout: RouterConfig::FORWARD_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
struct IdentityCheck {
    /// Binary name the backend reported, `None` if the query failed.
    reported: Option<String>,
    checked_at: Instant,
}

/// Resolves `instance_id` to a live backend and forwards the call.
pub struct Router {
    registry: Arc<InstanceRegistry>,
    client: Arc<dyn BackendClient>,
    options: RouterOptions,
    identity_cache: Mutex<HashMap<String, IdentityCheck>>,
}

/// Basename after the last `/` or `\`, lowercased.
pub fn normalize_binary_name(name: &str) -> String {
    name.rsplit(['/', '\\']).next().unwrap_or(name).to_lowercase()
}

/// Copy of `params` without the routing-only `arguments.instance_id`.
pub fn strip_instance_id(params: &Value) -> Value {
    let mut forwarded = params.clone();
    if let Some(arguments) = forwarded
        .get_mut("arguments")
        .and_then(Value::as_object_mut)
    {
        arguments.remove(RouterConfig::INSTANCE_ID_ARG);
    }
    forwarded
}

/// The `arguments.instance_id` of a request, if present and non-empty.
pub fn requested_instance_id(params: &Value) -> Option<&str> {
    params
        .get("arguments")
        .and_then(|args| args.get(RouterConfig::INSTANCE_ID_ARG))
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
}

impl Router {
    pub fn new(
        registry: Arc<InstanceRegistry>,
        client: Arc<dyn BackendClient>,
        options: RouterOptions,
    ) -> Self {
        Self {
            registry,
            client,
            options,
            identity_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    /// Route `method` to the instance named in `params.arguments.instance_id`.
    ///
    /// Resolution order:
    /// 1. no `instance_id` -> [`HubError::MissingInstanceId`] listing every instance
    /// 2. unknown ID -> [`HubError::Expired`] with same-binary replacements if
    ///    the ID is in the expired set, else [`HubError::InstanceNotFound`]
    /// 3. binary identity check, cached per instance; a failed query passes
    /// 4. forward without `instance_id`, no retry
    pub async fn route_request(&self, method: &str, params: Value) -> Result<Value> {
        let Some(instance_id) = requested_instance_id(&params).map(str::to_string) else {
            return Err(HubError::MissingInstanceId {
                available_instances: self.registry.run_blocking(|r| r.summaries()).await?,
            });
        };

        let lookup_id = instance_id.clone();
        let Some(instance) = self
            .registry
            .run_blocking(move |r| r.get_instance(&lookup_id))
            .await?
        else {
            return Err(self.unknown_instance(&instance_id).await?);
        };

        self.verify_identity(&instance_id, &instance).await?;

        let forwarded = strip_instance_id(&params);
        debug!(
            "Routing {} to {} at {}:{}",
            method, instance_id, instance.host, instance.port
        );
        self.client
            .call(
                &instance.host,
                instance.port,
                method,
                forwarded,
                self.options.forward_timeout,
            )
            .await
    }

    /// Drop cached identity results, e.g. after the registry changed.
    pub fn clear_identity_cache(&self) {
        if let Ok(mut cache) = self.identity_cache.lock() {
            cache.clear();
        }
    }

    async fn unknown_instance(&self, instance_id: &str) -> Result<HubError> {
        let lookup_id = instance_id.to_string();
        let (available, record) = self
            .registry
            .run_blocking(move |r| Ok((r.summaries()?, r.get_expired(&lookup_id)?)))
            .await?;

        let Some(record) = record else {
            return Ok(HubError::InstanceNotFound {
                instance_id: instance_id.to_string(),
                available_instances: available,
            });
        };

        let replacements = replacements_for(&record, &available);
        Ok(HubError::Expired {
            instance_id: instance_id.to_string(),
            expired_at: record.expired_at,
            reason: record.reason,
            replaced_by: record.replaced_by,
            replacements,
            available_instances: available,
        })
    }

    async fn verify_identity(&self, instance_id: &str, instance: &Instance) -> Result<()> {
        if instance.binary_name.is_empty() || instance.binary_name == RegistryConfig::UNKNOWN {
            return Ok(());
        }

        let reported = match self.cached_identity(instance_id) {
            Some(reported) => reported,
            None => {
                let reported = match self
                    .client
                    .query_metadata(&instance.host, instance.port)
                    .await
                {
                    Ok(metadata) => metadata.module,
                    Err(e) => {
                        debug!("Identity query for {} failed: {}", instance_id, e);
                        None
                    }
                };
                self.remember_identity(instance_id, reported.clone());
                reported
            }
        };

        match reported {
            Some(actual)
                if normalize_binary_name(&actual)
                    != normalize_binary_name(&instance.binary_name) =>
            {
                warn!(
                    "Instance {} now reports {} (registered as {})",
                    instance_id, actual, instance.binary_name
                );
                Err(HubError::BinaryMismatch {
                    instance_id: instance_id.to_string(),
                    expected: instance.binary_name.clone(),
                    actual,
                })
            }
            _ => Ok(()),
        }
    }

    fn cached_identity(&self, instance_id: &str) -> Option<Option<String>> {
        let cache = self.identity_cache.lock().ok()?;
        cache
            .get(instance_id)
            .filter(|check| check.checked_at.elapsed() < self.options.identity_ttl)
            .map(|check| check.reported.clone())
    }

    fn remember_identity(&self, instance_id: &str, reported: Option<String>) {
        if let Ok(mut cache) = self.identity_cache.lock() {
            cache.insert(
                instance_id.to_string(),
                IdentityCheck {
                    reported,
                    checked_at: Instant::now(),
                },
            );
        }
    }
}

fn replacements_for(record: &ExpiredRecord, live: &[InstanceSummary]) -> Vec<InstanceSummary> {
    let wanted = normalize_binary_name(&record.binary_name);
    live.iter()
        .filter(|summary| normalize_binary_name(&summary.binary_name) == wanted)
        .cloned()
        .collect()
}
