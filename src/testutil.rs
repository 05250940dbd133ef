//! In-memory stand-ins for Athena and Redis, for the unit tests.

use async_trait::async_trait;
use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::Mutex,
};

use crate::{
    athena::{BoundQuery, JobState, JobStatus, QueryEngine, ResultPage},
    cache::CacheStore,
    error::{Result, ServiceError},
};

pub fn row(cells: &[&str]) -> Vec<Option<String>> {
    cells.iter().map(|c| Some((*c).to_owned())).collect()
}

enum Canned {
    Rows(Vec<Vec<Option<String>>>),
    Fail(String),
}

#[derive(Default)]
struct EngineState {
    submitted: Vec<BoundQuery>,
    next_ids: VecDeque<String>,
    n_started: usize,
    canned: Vec<(String, Canned)>,
    statuses: HashMap<String, VecDeque<JobStatus>>,
    pages: HashMap<String, VecDeque<ResultPage>>,
    tokens: HashMap<String, Vec<Option<String>>>,
    status_calls: usize,
    stopped: Vec<String>,
    finish_unscripted: bool,
}

/// A scriptable query engine. By default jobs with no scripted statuses stay
/// RUNNING forever; `FakeEngine::succeeding()` makes them succeed at once.
#[derive(Default)]
pub struct FakeEngine {
    state: Mutex<EngineState>,
}

impl FakeEngine {
    pub fn succeeding() -> Self {
        let e = FakeEngine::default();
        e.state.lock().unwrap().finish_unscripted = true;
        e
    }

    pub fn set_next_job_id(&self, id: &str) {
        self.state.lock().unwrap().next_ids.push_back(id.to_owned());
    }

    /// Any submitted query whose SQL contains `fragment` yields `rows` as a
    /// single page. The first matching rule wins.
    pub fn on_query(&self, fragment: &str, rows: Vec<Vec<Option<String>>>) {
        self.state
            .lock()
            .unwrap()
            .canned
            .push((fragment.to_owned(), Canned::Rows(rows)));
    }

    /// Any submitted query whose SQL contains `fragment` fails.
    pub fn on_query_fail(&self, fragment: &str, reason: &str) {
        self.state
            .lock()
            .unwrap()
            .canned
            .push((fragment.to_owned(), Canned::Fail(reason.to_owned())));
    }

    pub fn script_status(&self, job: &str, states: Vec<JobState>) {
        for state in states {
            self.push_status(job, JobStatus { state, reason: None });
        }
    }

    pub fn push_status(&self, job: &str, status: JobStatus) {
        self.state
            .lock()
            .unwrap()
            .statuses
            .entry(job.to_owned())
            .or_default()
            .push_back(status);
    }

    pub fn push_page(&self, job: &str, rows: Vec<Vec<Option<String>>>, next_token: Option<&str>) {
        self.state
            .lock()
            .unwrap()
            .pages
            .entry(job.to_owned())
            .or_default()
            .push_back(ResultPage {
                rows,
                next_token: next_token.map(str::to_owned),
            });
    }

    pub fn submitted(&self) -> Vec<BoundQuery> {
        self.state.lock().unwrap().submitted.clone()
    }

    pub fn status_calls(&self) -> usize {
        self.state.lock().unwrap().status_calls
    }

    pub fn stopped(&self) -> Vec<String> {
        self.state.lock().unwrap().stopped.clone()
    }

    pub fn tokens_seen(&self, job: &str) -> Vec<Option<String>> {
        self.state
            .lock()
            .unwrap()
            .tokens
            .get(job)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl QueryEngine for FakeEngine {
    async fn start_query(&self, query: &BoundQuery) -> Result<String> {
        let mut st = self.state.lock().unwrap();
        st.n_started += 1;
        let id = match st.next_ids.pop_front() {
            Some(id) => id,
            None => format!("job-{}", st.n_started),
        };
        st.submitted.push(query.clone());

        let canned = st
            .canned
            .iter()
            .find(|(frag, _)| query.sql.contains(frag.as_str()))
            .map(|(_, c)| match c {
                Canned::Rows(rows) => Canned::Rows(rows.clone()),
                Canned::Fail(r) => Canned::Fail(r.clone()),
            });

        match canned {
            Some(Canned::Rows(rows)) => {
                st.pages.entry(id.clone()).or_default().push_back(ResultPage {
                    rows,
                    next_token: None,
                });
            }
            Some(Canned::Fail(reason)) => {
                st.statuses.entry(id.clone()).or_default().push_back(JobStatus {
                    state: JobState::Failed,
                    reason: Some(reason),
                });
            }
            None => {}
        }

        Ok(id)
    }

    async fn query_status(&self, job_id: &str) -> Result<JobStatus> {
        let mut st = self.state.lock().unwrap();
        st.status_calls += 1;
        let finish = st.finish_unscripted;

        let scripted = st.statuses.get_mut(job_id).and_then(|q| q.pop_front());
        Ok(scripted.unwrap_or(JobStatus {
            state: if finish {
                JobState::Succeeded
            } else {
                JobState::Running
            },
            reason: None,
        }))
    }

    async fn results_page(&self, job_id: &str, next_token: Option<String>) -> Result<ResultPage> {
        let mut st = self.state.lock().unwrap();
        st.tokens
            .entry(job_id.to_owned())
            .or_default()
            .push(next_token);

        Ok(st
            .pages
            .get_mut(job_id)
            .and_then(|q| q.pop_front())
            .unwrap_or_default())
    }

    async fn stop_query(&self, job_id: &str) -> Result<()> {
        self.state.lock().unwrap().stopped.push(job_id.to_owned());
        Ok(())
    }
}

/// A key-value store that hands out SCAN results two keys at a time.
#[derive(Default)]
pub struct FakeCache {
    data: Mutex<BTreeMap<String, String>>,
    broken: bool,
}

impl FakeCache {
    pub fn broken() -> Self {
        FakeCache {
            broken: true,
            ..Default::default()
        }
    }

    pub fn insert(&self, key: &str, value: &str) {
        self.data
            .lock()
            .unwrap()
            .insert(key.to_owned(), value.to_owned());
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.data.lock().unwrap().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.data.lock().unwrap().len()
    }

    fn check(&self) -> Result<()> {
        if self.broken {
            Err(ServiceError::upstream("cache operation failed", "connection refused"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CacheStore for FakeCache {
    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.check()?;
        self.insert(key, value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        Ok(self.value(key))
    }

    async fn scan(&self, cursor: u64) -> Result<(Vec<String>, u64)> {
        self.check()?;
        let data = self.data.lock().unwrap();
        let start = cursor as usize;
        let keys: Vec<_> = data.keys().skip(start).take(2).cloned().collect();
        let end = start + keys.len();
        let next = if end >= data.len() { 0 } else { end as u64 };
        Ok((keys, next))
    }
}
