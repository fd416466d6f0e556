use crate::error::ViaductError;
use std::fmt::Display;
use std::fmt::Formatter;
use std::sync::Arc;

/// A globally unique object identity: the owning type plus the tenant's
/// internal id. Equality is structural on the pair; the serialized form is
/// opaque to tenants.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GlobalId {
    pub type_name: String,
    pub internal_id: String,
}

impl GlobalId {
    pub fn new(type_name: impl Into<String>, internal_id: impl Into<String>) -> Self {
        GlobalId {
            type_name: type_name.into(),
            internal_id: internal_id.into(),
        }
    }
}

impl Display for GlobalId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.type_name, self.internal_id)
    }
}

/// Serializes [`GlobalId`]s to and from their opaque string form. One codec
/// is shared by every tenant API in a deployment; implementations must be
/// thread-safe.
pub trait GlobalIdCodec: Send + Sync {
    fn encode(&self, id: &GlobalId) -> String;
    fn decode(&self, raw: &str) -> Result<GlobalId, ViaductError>;
}

/// Default codec: `<typeName>:<internalID>` with `:` and `\` escaped in the
/// components so the pair round-trips unambiguously.
pub struct DelimitedGlobalIdCodec;

const DELIMITER: char = ':';
const ESCAPE: char = '\\';

fn escape_component(component: &str, out: &mut String) {
    for c in component.chars() {
        if c == DELIMITER || c == ESCAPE {
            out.push(ESCAPE);
        }
        out.push(c);
    }
}

impl GlobalIdCodec for DelimitedGlobalIdCodec {
    fn encode(&self, id: &GlobalId) -> String {
        let mut out = String::with_capacity(id.type_name.len() + id.internal_id.len() + 1);
        escape_component(&id.type_name, &mut out);
        out.push(DELIMITER);
        escape_component(&id.internal_id, &mut out);
        out
    }

    fn decode(&self, raw: &str) -> Result<GlobalId, ViaductError> {
        let mut type_name = String::new();
        let mut internal_id = String::new();
        let mut target = &mut type_name;
        let mut saw_delimiter = false;
        let mut chars = raw.chars();
        while let Some(c) = chars.next() {
            match c {
                ESCAPE => match chars.next() {
                    Some(escaped) => target.push(escaped),
                    None => {
                        return Err(ViaductError::internal(format!(
                            "malformed global id \"{raw}\": dangling escape"
                        )))
                    }
                },
                DELIMITER if !saw_delimiter => {
                    saw_delimiter = true;
                    target = &mut internal_id;
                }
                c => target.push(c),
            }
        }
        if !saw_delimiter || type_name.is_empty() {
            return Err(ViaductError::internal(format!(
                "malformed global id \"{raw}\": expected \"<type>:<id>\""
            )));
        }
        Ok(GlobalId::new(type_name, internal_id))
    }
}

pub(crate) fn default_global_id_codec() -> Arc<dyn GlobalIdCodec> {
    Arc::new(DelimitedGlobalIdCodec)
}
