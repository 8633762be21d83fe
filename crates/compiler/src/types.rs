//! The Calculon type system.
//!
//! Types are interned in a [`TypeRegistry`] and identified by [`TypeId`];
//! identity is by canonical name, so `vector*3` names the same singleton
//! everywhere and `vector*1` is a different type from `real`. Vector types
//! are created on first demand. Aliases resolve with a single chase: an
//! alias may not point at another alias, which the registry rejects when the
//! alias is defined.

use std::collections::HashMap;
use std::fmt;

/// Floating-point width of `real`, chosen once per compiler instance and
/// uniform across the compiled module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    /// 32-bit IEEE-754
    Float,
    /// 64-bit IEEE-754
    Double,
}

impl Precision {
    /// Size in bytes of one real, as marshalled at the ABI boundary.
    pub fn size(&self) -> u32 {
        match self {
            Precision::Float => 4,
            Precision::Double => 8,
        }
    }
}

/// Interned handle to a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId(u32);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeKind {
    Real,
    Boolean,
    /// An N-wide vector of reals; N >= 1, one distinct type per width.
    Vector(u32),
}

#[derive(Debug)]
struct TypeInfo {
    name: String,
    kind: TypeKind,
}

pub struct TypeRegistry {
    infos: Vec<TypeInfo>,
    by_name: HashMap<String, TypeId>,
    aliases: HashMap<String, TypeId>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        let mut registry = TypeRegistry {
            infos: Vec::new(),
            by_name: HashMap::new(),
            aliases: HashMap::new(),
        };
        registry.register("real", TypeKind::Real);
        registry.register("boolean", TypeKind::Boolean);
        registry
    }

    fn register(&mut self, name: &str, kind: TypeKind) -> TypeId {
        let id = TypeId(self.infos.len() as u32);
        self.infos.push(TypeInfo {
            name: name.to_string(),
            kind,
        });
        self.by_name.insert(name.to_string(), id);
        id
    }

    pub fn real(&self) -> TypeId {
        self.by_name["real"]
    }

    pub fn boolean(&self) -> TypeId {
        self.by_name["boolean"]
    }

    /// The `vector*N` type of the given width, created on first demand.
    pub fn vector(&mut self, width: u32) -> TypeId {
        debug_assert!(width >= 1);
        let name = format!("vector*{}", width);
        match self.by_name.get(&name) {
            Some(&id) => id,
            None => self.register(&name, TypeKind::Vector(width)),
        }
    }

    /// Look a type up by name, chasing at most one alias. Returns `None` for
    /// unknown names; `vector*N` canonical names are materialised on demand.
    pub fn find(&mut self, name: &str) -> Option<TypeId> {
        if let Some(&id) = self.by_name.get(name) {
            return Some(id);
        }
        if let Some(&id) = self.aliases.get(name) {
            return Some(id);
        }
        if let Some(width) = name.strip_prefix("vector*") {
            if let Ok(width) = width.parse::<u32>() {
                if width >= 1 {
                    return Some(self.vector(width));
                }
            }
        }
        None
    }

    /// Define `name` as an alias for the canonical type `canonical`.
    ///
    /// The target must name a concrete type (not another alias) and `name`
    /// must be fresh; both are checked here, at definition time, so alias
    /// chains and cycles cannot be constructed.
    pub fn register_alias(&mut self, name: &str, canonical: &str) -> Result<(), String> {
        if self.by_name.contains_key(name) || self.aliases.contains_key(name) {
            return Err(format!("type '{}' is already defined", name));
        }
        if self.aliases.contains_key(canonical) {
            return Err(format!(
                "'{}' is an alias; aliases may only name concrete types",
                canonical
            ));
        }
        let target = self
            .find(canonical)
            .ok_or_else(|| format!("unknown type '{}'", canonical))?;
        self.aliases.insert(name.to_string(), target);
        Ok(())
    }

    pub fn kind(&self, id: TypeId) -> &TypeKind {
        &self.infos[id.0 as usize].kind
    }

    /// Canonical name, for diagnostics.
    pub fn name(&self, id: TypeId) -> &str {
        &self.infos[id.0 as usize].name
    }

    /// Width of a vector type, or `None` for scalars.
    pub fn vector_width(&self, id: TypeId) -> Option<u32> {
        match self.kind(id) {
            TypeKind::Vector(n) => Some(*n),
            _ => None,
        }
    }

    /// Number of SSA lanes a value of this type occupies.
    pub fn lanes(&self, id: TypeId) -> usize {
        self.vector_width(id).unwrap_or(1) as usize
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.infos.len())
            .field("aliases", &self.aliases.len())
            .finish()
    }
}
