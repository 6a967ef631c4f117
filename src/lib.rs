//! redis-operator library crate
//!
//! Exports the controllers, CRD definitions, topology managers and resource
//! generators for operating Redis in standalone, cluster, replication and
//! sentinel topologies.

pub mod client;
pub mod cluster;
pub mod controller;
pub mod crd;
pub mod health;
pub mod replication;
pub mod resources;

pub use health::HealthState;

use std::sync::Arc;

use futures::{Stream, StreamExt};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{Controller, WatchStreamExt, metadata_watcher, predicates, reflector, watcher};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use controller::context::Context;
use crd::{Redis, RedisCluster, RedisReplication, RedisSentinel};

/// Create namespaced or cluster-wide API based on scope
pub fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Create the default watcher configuration for all controllers.
fn default_watcher_config() -> WatcherConfig {
    WatcherConfig::default().any_semantic()
}

/// Create a reflector-backed stream filtered to generation changes.
///
/// Returns the reflector store (for cache lookups) and the filtered stream.
fn create_filtered_stream<K>(
    api: Api<K>,
    watcher_config: WatcherConfig,
) -> (
    reflector::Store<K>,
    impl Stream<Item = Result<K, watcher::Error>>,
)
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug + Send + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
{
    let (reader, writer) = reflector::store();
    let stream = reflector(writer, watcher(api, watcher_config))
        .default_backoff()
        .applied_objects()
        .predicate_filter(predicates::generation);
    (reader, stream)
}

async fn log_reconcile_results<K, S>(stream: S)
where
    K: Resource,
    S: Stream<
        Item = Result<
            (ObjectRef<K>, kube::runtime::controller::Action),
            kube::runtime::controller::Error<controller::error::Error, watcher::Error>,
        >,
    >,
{
    stream
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    debug!("Reconciled: {}", obj.name);
                }
                Err(e) => {
                    // Not-found after deletion is routine when owned-object
                    // events race the delete.
                    let is_not_found = match &e {
                        kube::runtime::controller::Error::ObjectNotFound(_) => true,
                        kube::runtime::controller::Error::ReconcilerFailed(err, _) => {
                            err.is_not_found()
                        }
                        _ => false,
                    };
                    if is_not_found {
                        debug!("Object no longer exists (likely deleted): {:?}", e);
                    } else {
                        error!("Reconciliation error: {:?}", e);
                    }
                }
            }
        })
        .await;
}

/// Run all four controllers (cluster-wide).
pub async fn run_controllers(client: Client, health_state: Option<Arc<HealthState>>) {
    run_controllers_scoped(client, health_state, None).await
}

/// Run all four controllers with optional namespace scoping.
///
/// Scoped mode is for integration tests, allowing parallel test execution
/// against disjoint namespaces.
pub async fn run_controllers_scoped(
    client: Client,
    health_state: Option<Arc<HealthState>>,
    namespace: Option<&str>,
) {
    let scope_msg = namespace.unwrap_or("cluster-wide");
    info!("Starting controllers (scope: {})", scope_msg);

    if let Some(ref state) = health_state {
        state.set_ready(true).await;
    }

    let ctx = Arc::new(Context::new(client.clone(), health_state));
    let watcher_config = default_watcher_config();

    let standalone = {
        let (reader, stream) = create_filtered_stream(
            scoped_api::<Redis>(client.clone(), namespace),
            watcher_config.clone(),
        );
        let stream = Controller::for_stream(stream, reader)
            .owns(
                scoped_api::<StatefulSet>(client.clone(), namespace),
                watcher_config.clone(),
            )
            .owns_stream(
                metadata_watcher(
                    scoped_api::<Service>(client.clone(), namespace),
                    watcher_config.clone(),
                )
                .touched_objects(),
            )
            .run(
                controller::standalone::reconcile,
                controller::standalone::error_policy,
                ctx.clone(),
            );
        log_reconcile_results(stream)
    };

    let cluster = {
        let (reader, stream) = create_filtered_stream(
            scoped_api::<RedisCluster>(client.clone(), namespace),
            watcher_config.clone(),
        );
        let stream = Controller::for_stream(stream, reader)
            .owns(
                scoped_api::<StatefulSet>(client.clone(), namespace),
                watcher_config.clone(),
            )
            .owns_stream(
                metadata_watcher(
                    scoped_api::<Service>(client.clone(), namespace),
                    watcher_config.clone(),
                )
                .touched_objects(),
            )
            .owns_stream(
                metadata_watcher(
                    scoped_api::<PodDisruptionBudget>(client.clone(), namespace),
                    watcher_config.clone(),
                )
                .touched_objects(),
            )
            .run(
                controller::cluster::reconcile,
                controller::cluster::error_policy,
                ctx.clone(),
            );
        log_reconcile_results(stream)
    };

    let replication = {
        let (reader, stream) = create_filtered_stream(
            scoped_api::<RedisReplication>(client.clone(), namespace),
            watcher_config.clone(),
        );
        let stream = Controller::for_stream(stream, reader)
            .owns(
                scoped_api::<StatefulSet>(client.clone(), namespace),
                watcher_config.clone(),
            )
            .owns_stream(
                metadata_watcher(
                    scoped_api::<Service>(client.clone(), namespace),
                    watcher_config.clone(),
                )
                .touched_objects(),
            )
            .run(
                controller::replication::reconcile,
                controller::replication::error_policy,
                ctx.clone(),
            );
        log_reconcile_results(stream)
    };

    let sentinel = {
        let (reader, stream) = create_filtered_stream(
            scoped_api::<RedisSentinel>(client.clone(), namespace),
            watcher_config.clone(),
        );
        // Changes to a monitored RedisReplication re-trigger every sentinel
        // group referencing it, so the readiness gate never has to poll.
        let sentinel_cache = reader.clone();
        let stream = Controller::for_stream(stream, reader)
            .owns(
                scoped_api::<StatefulSet>(client.clone(), namespace),
                watcher_config.clone(),
            )
            .watches(
                scoped_api::<RedisReplication>(client.clone(), namespace),
                watcher_config.clone(),
                move |replication| {
                    let replication_name = replication.name_any();
                    let replication_ns = replication.namespace();
                    sentinel_cache
                        .state()
                        .into_iter()
                        .filter(move |s| {
                            s.spec.replication_ref == replication_name
                                && s.namespace() == replication_ns
                        })
                        .map(|s| ObjectRef::from_obj(s.as_ref()))
                },
            )
            .run(
                controller::sentinel::reconcile,
                controller::sentinel::error_policy,
                ctx.clone(),
            );
        log_reconcile_results(stream)
    };

    futures::join!(standalone, cluster, replication, sentinel);

    // This should never complete in normal operation
    error!("Controller streams ended unexpectedly");
}
