//! In-memory backend for unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use evstore_types::{BackendError, Dc, Event, IdFilter, IdSink, Query, RawTopic, StorageBackend, TimeQuery};

#[derive(Default)]
struct State {
    events: Vec<Event>,
    topics: Vec<(RawTopic, bool)>,
    dcs: Vec<Dc>,
}

/// Records writes, can be switched into a failing mode, and returns search
/// results in reverse insertion order so callers must sort.
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
    failing: AtomicBool,
    pub event_writes: AtomicUsize,
    pub closed: AtomicBool,
}

impl MemoryBackend {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.lock().unwrap().events.clone()
    }

    /// Overwrites a stored schema without any checks, as a bad manual edit
    /// would.
    pub fn corrupt_schema(&self, topic_id: &str, schema: &str) {
        let mut state = self.state.lock().unwrap();
        for (topic, _) in &mut state.topics {
            if topic.id == topic_id {
                topic.schema = schema.to_string();
            }
        }
    }

    fn name_taken(&self, name: &str, id: &str, dc: bool) -> Result<(), BackendError> {
        let state = self.state.lock().unwrap();
        let taken = if dc {
            state.dcs.iter().any(|d| d.id != id && d.name.eq_ignore_ascii_case(name))
        } else {
            state
                .topics
                .iter()
                .any(|(t, deleted)| !deleted && t.id != id && t.name.eq_ignore_ascii_case(name))
        };
        if taken {
            Err(BackendError::Conflict(format!("{name} is taken")))
        } else {
            Ok(())
        }
    }

    fn check(&self) -> Result<(), BackendError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(BackendError::Unavailable("backend switched off".to_string()))
        } else {
            Ok(())
        }
    }
}

fn any_of(filter: &[String], value: &str) -> bool {
    filter.is_empty() || filter.iter().any(|f| f == value)
}

fn overlaps(filter: &[String], values: &[String]) -> bool {
    filter.is_empty() || values.iter().any(|v| filter.contains(v))
}

impl StorageBackend for MemoryBackend {
    fn write_event(&self, event: &Event) -> Result<(), BackendError> {
        self.check()?;
        self.event_writes.fetch_add(1, Ordering::SeqCst);
        self.state.lock().unwrap().events.push(event.clone());
        Ok(())
    }

    fn search(
        &self,
        query: &Query,
        topic_ids: &IdFilter,
        dc_ids: &IdFilter,
    ) -> Result<Vec<Event>, BackendError> {
        self.check()?;
        let state = self.state.lock().unwrap();
        let live = |topic_id: &str| state.topics.iter().any(|(t, deleted)| t.id == topic_id && !deleted);
        let mut hits: Vec<Event> = state
            .events
            .iter()
            .filter(|e| live(&e.topic_id))
            .filter(|e| topic_ids.accepts(&e.topic_id) && dc_ids.accepts(&e.dc_id))
            .filter(|e| e.event_time >= query.start_event_time * 1_000)
            .filter(|e| e.event_time <= query.end_event_time * 1_000)
            .filter(|e| any_of(&query.host, &e.host) && any_of(&query.user, &e.user))
            .filter(|e| any_of(&query.parent_event_id, &e.parent_event_id))
            .filter(|e| overlaps(&query.tag_set, &e.tags) && overlaps(&query.target_host, &e.target_hosts))
            .cloned()
            .collect();
        hits.reverse();
        Ok(hits
            .into_iter()
            .skip(query.from as usize)
            .take(query.page_size() as usize)
            .collect())
    }

    fn fetch_by_id(&self, id: &str, include_soft_deleted: bool) -> Result<Option<Event>, BackendError> {
        self.check()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .events
            .iter()
            .find(|e| e.event_id == id)
            .filter(|e| {
                include_soft_deleted
                    || state.topics.iter().any(|(t, deleted)| t.id == e.topic_id && !deleted)
            })
            .cloned())
    }

    fn stream_ids(&self, query: &TimeQuery, sink: &mut IdSink<'_>) -> Result<(), BackendError> {
        self.check()?;
        let mut events: Vec<Event> = {
            let state = self.state.lock().unwrap();
            let live = |topic_id: &str| state.topics.iter().any(|(t, deleted)| t.id == topic_id && !deleted);
            state.events.iter().filter(|e| live(&e.topic_id)).cloned().collect()
        };
        events.retain(|e| {
            e.event_time >= query.start_event_time * 1_000 && e.event_time <= query.end_event_time * 1_000
        });
        events.sort_by(|a, b| a.event_time.cmp(&b.event_time).then_with(|| a.event_id.cmp(&b.event_id)));
        if !query.ascending {
            events.reverse();
        }
        for event in events.into_iter().take(query.limit as usize) {
            sink(event.event_id)?;
        }
        Ok(())
    }

    fn put_topic(&self, topic: &RawTopic) -> Result<(), BackendError> {
        self.check()?;
        self.name_taken(&topic.name, &topic.id, false)?;
        self.state.lock().unwrap().topics.push((topic.clone(), false));
        Ok(())
    }

    fn update_topic(&self, topic: &RawTopic) -> Result<(), BackendError> {
        self.check()?;
        self.name_taken(&topic.name, &topic.id, false)?;
        let mut state = self.state.lock().unwrap();
        for (stored, _) in &mut state.topics {
            if stored.id == topic.id {
                *stored = topic.clone();
            }
        }
        Ok(())
    }

    fn delete_topic(&self, id: &str) -> Result<(), BackendError> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        for (stored, deleted) in &mut state.topics {
            if stored.id == id {
                *deleted = true;
            }
        }
        Ok(())
    }

    fn list_topics(&self) -> Result<Vec<RawTopic>, BackendError> {
        self.check()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .topics
            .iter()
            .filter(|(_, deleted)| !deleted)
            .map(|(t, _)| t.clone())
            .collect())
    }

    fn put_dc(&self, dc: &Dc) -> Result<(), BackendError> {
        self.check()?;
        self.name_taken(&dc.name, &dc.id, true)?;
        self.state.lock().unwrap().dcs.push(dc.clone());
        Ok(())
    }

    fn update_dc(&self, id: &str, new_name: &str) -> Result<(), BackendError> {
        self.check()?;
        self.name_taken(new_name, id, true)?;
        let mut state = self.state.lock().unwrap();
        for dc in state.dcs.iter_mut().filter(|dc| dc.id == id) {
            dc.name = new_name.to_string();
        }
        Ok(())
    }

    fn list_dcs(&self) -> Result<Vec<Dc>, BackendError> {
        self.check()?;
        Ok(self.state.lock().unwrap().dcs.clone())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
