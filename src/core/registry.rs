//! Layer 3: Attribute value registry and app registration
//!
//! Concurrency-safe map from attribute spec identity to value prototype,
//! plus the app descriptor table used to resolve pin requests.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::warn;

use super::cell::AppRuntime;
use super::error::RegistryError;
use super::spec::TagSpec;
use super::tag::{AttrUid, TagId};
use super::value::AttrValue;

/// A registered attribute type: resolved spec plus value prototype.
///
/// Created once at registration, immutable thereafter, owned by the registry.
pub struct AttrDef {
    spec: TagSpec,
    prototype: Box<dyn AttrValue>,
}

impl AttrDef {
    pub fn spec(&self) -> &TagSpec {
        &self.spec
    }

    fn value_type(&self) -> TypeId {
        self.prototype.as_any().type_id()
    }
}

/// Factory producing one app runtime instance per host session.
pub type AppFactory = Arc<dyn Fn() -> Arc<dyn AppRuntime> + Send + Sync>;

/// An application descriptor: identity, invocation aliases, runtime factory.
#[derive(Clone)]
pub struct AppDef {
    pub spec: TagSpec,
    pub invocations: Vec<String>,
    pub factory: AppFactory,
}

/// Process- or session-scoped registry.
///
/// Read-mostly: lookups take the read lock, registration the write lock.
/// Shared freely across concurrently active pins.
#[derive(Default)]
pub struct Registry {
    attrs: RwLock<HashMap<AttrUid, AttrDef>>,
    apps: RwLock<AppTable>,
}

#[derive(Default)]
struct AppTable {
    by_tag: HashMap<TagId, Arc<AppDef>>,
    by_alias: HashMap<String, TagId>,
}

impl Registry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a value prototype under `context` + leaf name.
    ///
    /// The leaf defaults to the prototype's own spec name. Re-registering the
    /// same (spec, type) pair is idempotent; a different type under an
    /// already-used ID is a caller error - flagged, last write wins.
    pub fn register_prototype(
        &self,
        context: &TagSpec,
        prototype: Box<dyn AttrValue>,
        name: Option<&str>,
    ) -> TagSpec {
        let leaf = name.unwrap_or_else(|| prototype.spec_name());
        let spec = context.with(leaf);
        let uid = spec.id().attr_uid();

        let def = AttrDef { spec: spec.clone(), prototype };
        let mut attrs = self.attrs.write().expect("registry lock");
        if let Some(existing) = attrs.get(&uid) {
            if existing.value_type() == def.value_type() {
                return spec;
            }
            warn!(attr = %spec, "prototype conflict: replacing registered value type");
        }
        attrs.insert(uid, def);
        spec
    }

    /// Produce a fresh, zero-valued instance for a wire attribute identity.
    pub fn make_value(&self, uid: AttrUid) -> Result<Box<dyn AttrValue>, RegistryError> {
        let attrs = self.attrs.read().expect("registry lock");
        attrs
            .get(&uid)
            .map(|def| def.prototype.new_instance())
            .ok_or(RegistryError::AttrNotFound { uid })
    }

    /// Resolved spec for a wire attribute identity, if registered.
    pub fn attr_spec(&self, uid: AttrUid) -> Option<TagSpec> {
        let attrs = self.attrs.read().expect("registry lock");
        attrs.get(&uid).map(|def| def.spec.clone())
    }

    /// Merge another registry's entries into this one.
    ///
    /// Used when a session registry seeds from the process-wide registry.
    /// An entry already present with a differing type is kept as-is and the
    /// conflict flagged; later entries never silently overwrite earlier ones.
    pub fn import(&self, other: &Registry) {
        {
            let theirs = other.attrs.read().expect("registry lock");
            let mut ours = self.attrs.write().expect("registry lock");
            for (uid, def) in theirs.iter() {
                match ours.get(uid) {
                    Some(existing) if existing.value_type() != def.value_type() => {
                        warn!(attr = %def.spec, "import conflict: keeping existing value type");
                    }
                    Some(_) => {}
                    None => {
                        ours.insert(
                            *uid,
                            AttrDef {
                                spec: def.spec.clone(),
                                prototype: def.prototype.new_instance(),
                            },
                        );
                    }
                }
            }
        }

        let theirs = other.apps.read().expect("registry lock");
        for def in theirs.by_tag.values() {
            self.register_app(AppDef::clone(def));
        }
    }

    /// Register an application descriptor and its invocation aliases.
    pub fn register_app(&self, def: AppDef) {
        let tag = def.spec.id();
        let def = Arc::new(def);
        let mut apps = self.apps.write().expect("registry lock");
        for alias in &def.invocations {
            apps.by_alias.insert(alias.clone(), tag);
        }
        apps.by_tag.insert(tag, def);
    }

    pub fn app_by_tag(&self, tag: &TagId) -> Option<Arc<AppDef>> {
        let apps = self.apps.read().expect("registry lock");
        apps.by_tag.get(tag).cloned()
    }

    /// Resolve a human-typed invocation: explicit alias, then the full app
    /// identifier, then the first path segment of the identifier.
    pub fn app_for_invocation(&self, invocation: &str) -> Result<Arc<AppDef>, RegistryError> {
        let apps = self.apps.read().expect("registry lock");
        if let Some(tag) = apps.by_alias.get(invocation) {
            if let Some(def) = apps.by_tag.get(tag) {
                return Ok(def.clone());
            }
        }
        if let Some(def) = apps
            .by_tag
            .values()
            .find(|def| def.spec.canonic() == invocation)
        {
            return Ok(def.clone());
        }
        if let Some(def) = apps
            .by_tag
            .values()
            .find(|def| def.spec.canonic().split('.').next() == Some(invocation))
        {
            return Ok(def.clone());
        }
        Err(RegistryError::AppNotFound {
            invocation: invocation.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::{TagValue, TextValue};

    fn attrs_context() -> TagSpec {
        TagSpec::root().with("test.attrs")
    }

    #[test]
    fn make_value_on_unregistered_id_is_attr_not_found() {
        let registry = Registry::new();
        let uid = TagId::from_literal("never-registered").attr_uid();
        let err = registry.make_value(uid).unwrap_err();
        assert!(matches!(err, RegistryError::AttrNotFound { uid: got } if got == uid));
    }

    #[test]
    fn registered_prototype_produces_typed_instances() {
        let registry = Registry::new();
        let spec =
            registry.register_prototype(&attrs_context(), Box::new(TextValue::default()), None);
        assert_eq!(spec.canonic(), "test.attrs.Text");

        let value = registry.make_value(spec.id().attr_uid()).unwrap();
        assert!(value.as_any().downcast_ref::<TextValue>().is_some());
    }

    #[test]
    fn reregistration_of_same_type_is_idempotent() {
        let registry = Registry::new();
        let ctx = attrs_context();
        let a = registry.register_prototype(&ctx, Box::new(TagValue::default()), Some("ref"));
        let b = registry.register_prototype(&ctx, Box::new(TagValue::default()), Some("ref"));
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn import_does_not_overwrite_differing_entries() {
        let ctx = attrs_context();
        let ours = Registry::new();
        let spec = ours.register_prototype(&ctx, Box::new(TextValue::default()), Some("slot"));

        let theirs = Registry::new();
        theirs.register_prototype(&ctx, Box::new(TagValue::default()), Some("slot"));
        theirs.register_prototype(&ctx, Box::new(TagValue::default()), Some("other"));

        ours.import(&theirs);

        let kept = ours.make_value(spec.id().attr_uid()).unwrap();
        assert!(kept.as_any().downcast_ref::<TextValue>().is_some());
        let merged = ours
            .make_value(ctx.with("other").id().attr_uid())
            .unwrap();
        assert!(merged.as_any().downcast_ref::<TagValue>().is_some());
    }
}
