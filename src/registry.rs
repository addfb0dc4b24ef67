//! Adapter registries for mail providers, carrier parsers and targets.
//!
//! Registries are filled once at startup and then shared behind an `Arc`.
//! Registration order is preserved: the parser engine uses it to break ties
//! between weak carrier matches.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::error::RegistryError;
use crate::parser::CarrierParser;
use crate::parser::carriers;
use crate::routing::TargetAdapter;

/// Ordered key → capability table.
pub struct Registry<T> {
    kind: &'static str,
    entries: Vec<(String, T)>,
    index: HashMap<String, usize>,
}

impl<T> Registry<T> {
    /// Create an empty registry for the given adapter kind.
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Register a capability. Re-registering a key replaces it in place
    /// (last write wins, original position kept).
    pub fn register(&mut self, key: impl Into<String>, capability: T) {
        let key = key.into();
        match self.index.get(&key) {
            Some(&pos) => {
                debug!(kind = self.kind, key = %key, "Replacing registered adapter");
                self.entries[pos].1 = capability;
            }
            None => {
                debug!(kind = self.kind, key = %key, "Registered adapter");
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, capability));
            }
        }
    }

    /// Look up a capability by key.
    pub fn resolve(&self, key: &str) -> Result<&T, RegistryError> {
        self.index
            .get(key)
            .map(|&pos| &self.entries[pos].1)
            .ok_or_else(|| RegistryError::NotFound {
                kind: self.kind.to_string(),
                key: key.to_string(),
            })
    }

    /// Registered keys in registration order.
    pub fn list_keys(&self) -> Vec<String> {
        self.entries.iter().map(|(key, _)| key.clone()).collect()
    }

    /// Iterate entries in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.entries.iter().map(|(key, cap)| (key.as_str(), cap))
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ── Capabilities ────────────────────────────────────────────────────

/// Mail provider families. Retrieval itself lives outside this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Gmail,
    GenericImap,
}

/// What a registered mail provider is.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderCapability {
    pub kind: ProviderKind,
    pub description: String,
}

/// Target families the routing engine can dispatch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    GoogleCalendar,
    CalendarIcs,
    TodoGeneric,
    NtfyPush,
}

/// A registered target: its family plus the adapter that delivers to it.
#[derive(Clone)]
pub struct TargetCapability {
    pub kind: TargetKind,
    pub description: String,
    pub adapter: Arc<dyn TargetAdapter>,
}

impl std::fmt::Debug for TargetCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetCapability")
            .field("kind", &self.kind)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// All three registries, built once at process start.
pub struct AdapterRegistries {
    pub providers: Registry<ProviderCapability>,
    pub parsers: Registry<Arc<dyn CarrierParser>>,
    pub targets: Registry<TargetCapability>,
}

impl AdapterRegistries {
    /// Empty registries.
    pub fn new() -> Self {
        Self {
            providers: Registry::new("mail_provider"),
            parsers: Registry::new("parser"),
            targets: Registry::new("target"),
        }
    }

    /// The built-in providers, carrier parsers and target keys.
    ///
    /// Every target key is served by `adapter`; concrete integrations
    /// replace it per key with `targets.register`.
    pub fn builtin(adapter: Arc<dyn TargetAdapter>) -> Self {
        let mut registries = Self::new();

        registries.providers.register(
            "gmail",
            ProviderCapability {
                kind: ProviderKind::Gmail,
                description: "Gmail IMAP adapter".into(),
            },
        );
        registries.providers.register(
            "generic_imap",
            ProviderCapability {
                kind: ProviderKind::GenericImap,
                description: "Fallback IMAP adapter".into(),
            },
        );

        for parser in carriers::builtin_parsers() {
            registries.register_parser(parser);
        }

        let targets = [
            ("google_calendar", TargetKind::GoogleCalendar, "Google Calendar adapter"),
            ("calendar_ics", TargetKind::CalendarIcs, "ICS file writer"),
            ("todo_generic", TargetKind::TodoGeneric, "Generic todo adapter"),
            ("ntfy_push", TargetKind::NtfyPush, "ntfy push adapter"),
        ];
        for (key, kind, description) in targets {
            registries.targets.register(
                key,
                TargetCapability {
                    kind,
                    description: description.into(),
                    adapter: Arc::clone(&adapter),
                },
            );
        }

        registries
    }

    /// Register a parser under its own key.
    pub fn register_parser(&mut self, parser: Arc<dyn CarrierParser>) {
        let key = parser.key().to_string();
        self.parsers.register(key, parser);
    }
}

impl Default for AdapterRegistries {
    fn default() -> Self {
        Self::new()
    }
}
