//! Field-name conventions.
//!
//! Every rule about what a leading `#`, `@`, or `~` means lives here, so the
//! rest of the engine (and any external schema layer) derives behavior from
//! one place instead of scattering string literals.

/// Category of a property, decided by its name prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldCategory {
    /// `#`-prefixed: configuration and runtime fields.
    Config,
    /// `@`-prefixed: attributes. Persisted and propagated, never dispatched
    /// to the owning function.
    Attribute,
    /// Everything else: ordinary data inputs and outputs.
    Ordinary,
}

/// The type selector property.
pub const IS: &str = "#is";
/// Run-mode override.
pub const MODE: &str = "#mode";
/// Priority override (0-3).
pub const PRIORITY: &str = "#priority";
/// Synchronous-evaluation flag.
pub const SYNC: &str = "#sync";
/// Disable flag.
pub const DISABLED: &str = "#disabled";
/// Explicit call trigger.
pub const CALL: &str = "#call";
/// Cancel trigger.
pub const CANCEL: &str = "#cancel";
/// Default emission field written by [`FuncContext::output`].
///
/// [`FuncContext::output`]: crate::func::FuncContext::output
pub const OUTPUT: &str = "#output";
/// Pending indicator, set while a deferred result is outstanding.
pub const WAIT: &str = "#wait";
/// Ad hoc property descriptors attached to a single block.
pub const CUSTOM: &str = "#custom";
/// Length override for group (variadic) properties.
pub const LEN: &str = "#len";

/// Marker prefix for binding entries in serialized block data.
pub const BINDING_PREFIX: char = '~';

/// Path segment meaning "this block".
pub const SEG_SELF: &str = "#";
/// Path segment meaning "one block up".
pub const SEG_UP: &str = "##";
/// Path segment meaning "the root flow of this block".
pub const SEG_ROOT_FLOW: &str = "###";

/// Classify a field name by its prefix.
pub fn category(name: &str) -> FieldCategory {
    if name.starts_with('#') {
        FieldCategory::Config
    } else if name.starts_with('@') {
        FieldCategory::Attribute
    } else {
        FieldCategory::Ordinary
    }
}

/// Whether a config field belongs to the reserved meta set that is parsed by
/// the engine and forwarded to `Function::config_changed`.
///
/// Any other `#`-prefixed field (outputs, wait indicators, worker slots) is
/// a runtime field: stored and propagated, but never dispatched to the
/// owning function. That is also what keeps a function's own emissions
/// from re-triggering it.
pub fn is_meta(name: &str) -> bool {
    matches!(name, IS | MODE | PRIORITY | SYNC | DISABLED | CALL | CANCEL)
}

/// Whether `name` can serve as a block or flow path segment. Segments must
/// be non-empty, free of dots and path separators, and must not start with
/// a reserved prefix.
pub fn valid_segment(name: &str) -> bool {
    !name.is_empty() && !name.contains(['.', '/', '\\']) && !name.starts_with(['#', '@', '~'])
}

/// The serialized key for a binding on field `name`.
pub fn binding_key(name: &str) -> String {
    format!("{BINDING_PREFIX}{name}")
}

/// If `key` is a serialized binding key, the field name it targets.
pub fn as_binding_key(key: &str) -> Option<&str> {
    key.strip_prefix(BINDING_PREFIX)
}
