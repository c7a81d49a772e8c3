// SPDX-License-Identifier: Apache-2.0

use crate::topology::component::{Exporter, Processor, Receiver};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ComponentError {
    #[error("component name must not be blank")]
    BlankName,

    #[error("duplicate {kind} component: {name}")]
    Duplicate { kind: &'static str, name: String },
}

/// Resolves configured component names to live instances. Lookups are
/// case-insensitive and blank names never resolve.
#[derive(Default, Clone)]
pub struct ComponentRegistry {
    receivers: HashMap<String, Arc<dyn Receiver>>,
    processors: HashMap<String, Arc<dyn Processor>>,
    exporters: HashMap<String, Arc<dyn Exporter>>,
}

fn registry_key(name: &str) -> Option<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}

fn insert<T: ?Sized>(
    map: &mut HashMap<String, Arc<T>>,
    kind: &'static str,
    name: &str,
    component: Arc<T>,
) -> Result<(), ComponentError> {
    let key = registry_key(name).ok_or(ComponentError::BlankName)?;
    if map.contains_key(&key) {
        return Err(ComponentError::Duplicate {
            kind,
            name: name.to_string(),
        });
    }
    map.insert(key, component);
    Ok(())
}

fn lookup<T: ?Sized>(map: &HashMap<String, Arc<T>>, name: &str) -> Option<Arc<T>> {
    registry_key(name).and_then(|k| map.get(&k).cloned())
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_receiver(&mut self, r: Arc<dyn Receiver>) -> Result<(), ComponentError> {
        let name = r.name().to_string();
        insert(&mut self.receivers, "receiver", &name, r)
    }

    pub fn register_processor(&mut self, p: Arc<dyn Processor>) -> Result<(), ComponentError> {
        let name = p.name().to_string();
        insert(&mut self.processors, "processor", &name, p)
    }

    pub fn register_exporter(&mut self, e: Arc<dyn Exporter>) -> Result<(), ComponentError> {
        let name = e.name().to_string();
        insert(&mut self.exporters, "exporter", &name, e)
    }

    pub fn receiver(&self, name: &str) -> Option<Arc<dyn Receiver>> {
        lookup(&self.receivers, name)
    }

    pub fn processor(&self, name: &str) -> Option<Arc<dyn Processor>> {
        lookup(&self.processors, name)
    }

    pub fn exporter(&self, name: &str) -> Option<Arc<dyn Exporter>> {
        lookup(&self.exporters, name)
    }

    pub fn len(&self) -> usize {
        self.receivers.len() + self.processors.len() + self.exporters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
pub(crate) mod test_components {
    use crate::receivers::output::RecordOutput;
    use crate::record::Record;
    use crate::topology::component::{Exporter, Processor, Receiver, ScopeId};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;
    use tower::BoxError;

    /// Emits a fixed set of records then idles until cancelled.
    pub struct StaticReceiver {
        pub name: String,
        pub records: Vec<Record>,
    }

    #[async_trait]
    impl Receiver for StaticReceiver {
        fn name(&self) -> &str {
            &self.name
        }

        async fn run(
            &self,
            output: RecordOutput,
            cancel: CancellationToken,
        ) -> Result<(), BoxError> {
            for r in &self.records {
                if output.send(r.clone()).await.is_err() {
                    return Ok(());
                }
            }
            cancel.cancelled().await;
            Ok(())
        }
    }

    pub struct PassThrough(pub String);

    impl Processor for PassThrough {
        fn name(&self) -> &str {
            &self.0
        }

        fn process(&self, _scope: ScopeId, batch: Vec<Record>) -> Vec<Record> {
            batch
        }
    }

    /// Collects every exported batch.
    #[derive(Default)]
    pub struct CollectingExporter {
        pub name: String,
        pub batches: Mutex<Vec<Vec<Record>>>,
    }

    impl CollectingExporter {
        pub fn named(name: &str) -> Self {
            Self {
                name: name.to_string(),
                batches: Mutex::new(Vec::new()),
            }
        }

        pub fn records(&self) -> Vec<Record> {
            self.batches.lock().unwrap().iter().flatten().cloned().collect()
        }
    }

    #[async_trait]
    impl Exporter for CollectingExporter {
        fn name(&self) -> &str {
            &self.name
        }

        async fn export(&self, batch: &[Record]) {
            self.batches.lock().unwrap().push(batch.to_vec());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_components::*;
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let mut reg = ComponentRegistry::new();
        reg.register_exporter(Arc::new(CollectingExporter::named("Debug")))
            .unwrap();
        reg.register_processor(Arc::new(PassThrough("Mask".to_string())))
            .unwrap();

        assert!(reg.exporter("debug").is_some());
        assert!(reg.exporter("DEBUG").is_some());
        assert!(reg.processor("mask").is_some());
        assert!(reg.exporter("other").is_none());
        assert_eq!(2, reg.len());
    }

    #[test]
    fn blank_names_rejected() {
        let mut reg = ComponentRegistry::new();
        assert_eq!(
            Err(ComponentError::BlankName),
            reg.register_exporter(Arc::new(CollectingExporter::named("  ")))
        );
        assert!(reg.exporter("").is_none());
        assert!(reg.exporter("   ").is_none());
    }

    #[test]
    fn duplicates_rejected() {
        let mut reg = ComponentRegistry::new();
        reg.register_exporter(Arc::new(CollectingExporter::named("a")))
            .unwrap();
        assert!(matches!(
            reg.register_exporter(Arc::new(CollectingExporter::named("A"))),
            Err(ComponentError::Duplicate { .. })
        ));
    }
}
