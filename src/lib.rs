//! The AWS/Lambda-powered HydroNode aggregate data services
//!
//! This library crate implements the services behind the HydroNode sensor
//! dashboards' aggregate views. This common codebase is compiled into three
//! executables: `hydronode-lambda-bare`, `hydronode-lambda-proxyevent`, and
//! `hydronode-lambda-oneshot`. The first speaks plain JSON-in, JSON-out (and
//! is what the scheduled cache job uses); the second sits behind AWS API
//! Gateway's "proxy event" framework; the last runs one invocation from the
//! command line, for local testing.
//!
//! The data live in the S3 data lake as pre-aggregated, date-partitioned
//! tables that we query through Athena. Athena queries take a while, so a
//! batch job periodically runs the usual queries and parks the results in a
//! Redis-compatible cache, which the dashboards then read.

use lambda_http::{http::Method, Body, Request, RequestExt, Response};
use lambda_runtime::{tracing, Error};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

mod aggdata;
pub mod api;
pub mod athena;
pub mod cache;
pub mod config;
pub mod error;
mod getaggregate;
mod listcache;
pub mod planner;
pub mod poller;
mod storecache;
pub mod timeframe;

#[cfg(test)]
mod testutil;

use api::{ApiResponse, Params};
use athena::QueryEngine;
use cache::CacheStore;
use error::ServiceError;

/// The functions that we know how to run, keyed by the name they're deployed
/// under.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Function {
    GetAggregatedData,
    StoreCache,
    GetAggregate,
    ListCacheKeys,
}

/// Reduce an ARN (or bare function name) to the part that tells the functions
/// apart: drop any `:alias` qualifier, a `-<env>` deployment suffix, and a
/// trailing `Function`, so that `...:function:hydroNodeGetAggregateFunction-dev`
/// becomes `hydronodegetaggregate`.
fn function_key(arn: &str) -> String {
    let name = match arn.split_once(":function:") {
        Some((_, rest)) => rest.split(':').next().unwrap_or(rest),
        None => arn.rsplit(':').next().unwrap_or(arn),
    };

    let mut name = name.to_ascii_lowercase();

    if let Some(i) = name.rfind('-') {
        name.truncate(i);
    }

    if let Some(stem) = name.strip_suffix("function") {
        name.truncate(stem.len());
    }

    name
}

impl Function {
    pub fn from_arn(arn: &str) -> Option<Self> {
        let key = function_key(arn);

        if key.ends_with("getaggregateddata") {
            Some(Function::GetAggregatedData)
        } else if key.ends_with("getaggregate") {
            Some(Function::GetAggregate)
        } else if key.ends_with("storecache") {
            Some(Function::StoreCache)
        } else if key.ends_with("listcachekeys") || key.ends_with("cachloadtest") {
            Some(Function::ListCacheKeys)
        } else {
            None
        }
    }
}

/// Work out which function an invocation is for. `localtest_arn` is the value
/// of `$HYDRONODE_LOCALTEST_ARN`, which stands in for the generic ARN that
/// local Lambda emulators report.
fn resolve_function(arn: &str, localtest_arn: Option<String>) -> Result<Function, Error> {
    let arn = if arn.ends_with(":test_function") {
        localtest_arn.ok_or_else(|| -> Error {
            "$HYDRONODE_LOCALTEST_ARN must be set for local testing".into()
        })?
    } else {
        arn.to_owned()
    };

    Function::from_arn(&arn).ok_or_else(|| format!("unhandled function: {}", arn).into())
}

pub struct Services {
    engine: Box<dyn QueryEngine>,
    cache: Option<Box<dyn CacheStore>>,
    settings: config::Settings,
}

/// Set up logging. CloudWatch timestamps everything already.
fn init_logging() -> Result<(), Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false) // don't print the module name
        .without_time() // don't print time (CloudWatch has it)
        .finish();

    tracing::dispatcher::set_global_default(subscriber.into())?;

    // Bridge `log` records from dependencies.
    tracing_log::LogTracer::init()?;
    Ok(())
}

impl Services {
    /// Create a state object for the HydroNode Lambda services.
    pub async fn init() -> Result<Self, Error> {
        init_logging()?;

        let settings = config::Settings::from_env()?;
        let config = aws_config::load_from_env().await;

        let engine = athena::AthenaEngine::new(
            aws_sdk_athena::Client::new(&config),
            settings.planner.database.clone(),
            settings.athena_output.clone(),
        );

        let cache: Option<Box<dyn CacheStore>> = match settings.redis_url.as_deref() {
            Some(url) => Some(Box::new(cache::RedisCache::new(url)?)),
            None => {
                tracing::warn!("no Redis endpoint configured; cache functions will fail");
                None
            }
        };

        Ok(Services::new(Box::new(engine), cache, settings))
    }

    /// Assemble the services from already-built backends.
    pub fn new(
        engine: Box<dyn QueryEngine>,
        cache: Option<Box<dyn CacheStore>>,
        settings: config::Settings,
    ) -> Self {
        Services {
            engine,
            cache,
            settings,
        }
    }

    fn cache(&self) -> Result<&dyn CacheStore, ServiceError> {
        self.cache.as_deref().ok_or_else(|| {
            ServiceError::upstream("cache unavailable", "no Redis endpoint configured")
        })
    }

    async fn run(&self, func: Function, payload: Option<Value>) -> Result<Value, ServiceError> {
        let planner = &self.settings.planner;

        match func {
            Function::GetAggregatedData => {
                aggdata::handler(Params::from_payload(payload)?, self.engine.as_ref(), planner).await
            }
            Function::StoreCache => {
                storecache::handler(self.engine.as_ref(), self.cache()?, planner).await
            }
            Function::GetAggregate => {
                getaggregate::handler(Params::from_payload(payload)?, self.cache()?).await
            }
            Function::ListCacheKeys => listcache::handler(self.cache()?).await,
        }
    }

    /// Handle an invocation of one of the HydroNode APIs.
    ///
    /// All of the functions are bundled into one executable, and we "know"
    /// which one is being invoked by looking at the suffix of the function
    /// ARN. Service failures come back as error responses, not as `Err`; an
    /// `Err` here means we don't know what function we're supposed to be.
    pub async fn dispatch(&self, arn: String, payload: Option<Value>) -> Result<ApiResponse, Error> {
        let func = resolve_function(&arn, std::env::var("HYDRONODE_LOCALTEST_ARN").ok())?;

        Ok(match self.run(func, payload).await {
            Ok(body) => ApiResponse::ok(body),

            Err(e) => {
                match &e {
                    ServiceError::Validation(_) | ServiceError::NotFound(_) => {
                        tracing::warn!("{func:?}: {e}")
                    }
                    _ => tracing::error!("{func:?} failed: {e}"),
                }

                ApiResponse::from(&e)
            }
        })
    }

    /// Handle a request arriving through API Gateway's proxy integration.
    ///
    /// CORS preflights are answered directly; everything else is dispatched
    /// with the query string as the payload.
    pub async fn dispatch_http(&self, arn: String, req: &Request) -> Result<Response<Body>, Error> {
        let resp = if req.method() == Method::OPTIONS {
            ApiResponse::preflight()
        } else {
            let query = req.query_string_parameters();
            let payload = api::payload_from_query(query.iter());
            self.dispatch(arn, Some(payload)).await?
        };

        Ok(api::to_http(&resp)?)
    }
}
