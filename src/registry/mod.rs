//! Interface Definition Registry
//!
//! Turns a parsed [`Schema`] into a validated, normalized [`Registry`]:
//! aliases inlined, object references resolved, every function, object and
//! method carrying a stable dispatch index, plus an [`InterfaceHash`] over
//! the result. `Registry::new` is a pure function of its input.

mod hash;
mod validation;

pub use validation::{TypeChecker, ValueError};

use std::collections::{BTreeSet, HashMap};

use plugbridge_abi::InterfaceHash;
use thiserror::Error;

use crate::types::{Case, Constructor, Field, Function, ObjectDef, Param, Schema, Type, TypeDef};

/// Highest description format version this build understands.
pub const SCHEMA_FORMAT_VERSION: u32 = 1;

/// Upper bound for dispatch indices; tables are dense vectors.
pub const MAX_INDEX: u32 = 65_535;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("schema {schema}: format version {found} is newer than supported version {supported}")]
    UnsupportedVersion {
        schema: String,
        found: u32,
        supported: u32,
    },

    #[error("{owner}: invalid name {name:?}")]
    InvalidName { owner: String, name: String },

    #[error("duplicate {kind} {name}")]
    Duplicate { kind: &'static str, name: String },

    #[error("{owner}: duplicate member {member}")]
    DuplicateMember { owner: String, member: String },

    #[error("{owner}: undefined type {name}")]
    UndefinedType { owner: String, name: String },

    #[error("{owner}: undefined object {name}")]
    UndefinedObject { owner: String, name: String },

    #[error("{owner}: throws {name}, which is not an enum")]
    InvalidThrows { owner: String, name: String },

    #[error("{owner}: map key {ty} is not a hashable primitive")]
    InvalidMapKey { owner: String, ty: String },

    #[error("{name} contains itself by value ({}); use option<...> or box<...>", .cycle.join(" -> "))]
    RecursiveType { name: String, cycle: Vec<String> },

    #[error("alias cycle through {}", .cycle.join(" -> "))]
    AliasCycle { cycle: Vec<String> },

    #[error("{kind} index {index} used by both {first} and {second}")]
    DuplicateIndex {
        kind: &'static str,
        index: u32,
        first: String,
        second: String,
    },

    #[error("{owner}: index {index} exceeds the largest dispatch index")]
    IndexOutOfRange { owner: String, index: u32 },
}

/// A validated, normalized interface.
#[derive(Debug, Clone)]
pub struct Registry {
    schema: Schema,
    hash: InterfaceHash,
    /// function index -> position in `schema.functions`
    function_slots: Vec<Option<usize>>,
    object_slots: Vec<Option<usize>>,
    /// per object position: method index -> position in `methods`
    method_slots: Vec<Vec<Option<usize>>>,
    functions_by_name: HashMap<String, usize>,
    objects_by_name: HashMap<String, usize>,
    types_by_name: HashMap<String, usize>,
}

impl Registry {
    /// Validate and normalize a schema.
    pub fn new(schema: Schema) -> Result<Self, SchemaError> {
        if schema.version > SCHEMA_FORMAT_VERSION {
            return Err(SchemaError::UnsupportedVersion {
                schema: schema.name.clone(),
                found: schema.version,
                supported: SCHEMA_FORMAT_VERSION,
            });
        }
        check_name("schema", &schema.name)?;

        check_unique_names(&schema)?;
        check_alias_cycles(&schema.types)?;

        let normalized = normalize(schema)?;
        check_map_keys(&normalized)?;
        check_by_value_recursion(&normalized.types)?;

        Self::index(normalized)
    }

    fn index(mut schema: Schema) -> Result<Self, SchemaError> {
        assign_indices(
            "function",
            schema
                .functions
                .iter_mut()
                .map(|f| (format!("function {}", f.name), &mut f.index)),
        )?;
        assign_indices(
            "object",
            schema
                .objects
                .iter_mut()
                .map(|o| (format!("object {}", o.name), &mut o.index)),
        )?;
        for object in &mut schema.objects {
            let object_name = object.name.clone();
            assign_indices(
                "method",
                object
                    .methods
                    .iter_mut()
                    .map(|m| (format!("object {object_name}, method {}", m.name), &mut m.index)),
            )?;
        }

        let function_slots = slots(schema.functions.iter().map(|f| f.index));
        let object_slots = slots(schema.objects.iter().map(|o| o.index));
        let method_slots = schema
            .objects
            .iter()
            .map(|o| slots(o.methods.iter().map(|m| m.index)))
            .collect();

        let functions_by_name = schema
            .functions
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect();
        let objects_by_name = schema
            .objects
            .iter()
            .enumerate()
            .map(|(i, o)| (o.name.clone(), i))
            .collect();
        let types_by_name = schema
            .types
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name().to_string(), i))
            .collect();

        let hash = hash::interface_hash(&schema);

        Ok(Self {
            schema,
            hash,
            function_slots,
            object_slots,
            method_slots,
            functions_by_name,
            objects_by_name,
            types_by_name,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    pub fn version(&self) -> u32 {
        self.schema.version
    }

    pub fn hash(&self) -> InterfaceHash {
        self.hash
    }

    /// Record and enum definitions (aliases are gone after normalization).
    pub fn types(&self) -> &[TypeDef] {
        &self.schema.types
    }

    pub fn typedef(&self, name: &str) -> Option<&TypeDef> {
        self.types_by_name
            .get(name)
            .map(|&i| &self.schema.types[i])
    }

    pub fn function(&self, index: u32) -> Option<&Function> {
        slot(&self.function_slots, index).map(|i| &self.schema.functions[i])
    }

    pub fn function_by_name(&self, name: &str) -> Option<&Function> {
        self.functions_by_name
            .get(name)
            .map(|&i| &self.schema.functions[i])
    }

    /// Functions in dispatch index order.
    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.function_slots
            .iter()
            .flatten()
            .map(|&i| &self.schema.functions[i])
    }

    /// Number of slots in the function dispatch table.
    pub fn function_table_len(&self) -> usize {
        self.function_slots.len()
    }

    pub fn object(&self, index: u32) -> Option<&ObjectDef> {
        slot(&self.object_slots, index).map(|i| &self.schema.objects[i])
    }

    pub fn object_by_name(&self, name: &str) -> Option<&ObjectDef> {
        self.objects_by_name
            .get(name)
            .map(|&i| &self.schema.objects[i])
    }

    /// Objects in dispatch index order.
    pub fn objects(&self) -> impl Iterator<Item = &ObjectDef> {
        self.object_slots
            .iter()
            .flatten()
            .map(|&i| &self.schema.objects[i])
    }

    pub fn object_table_len(&self) -> usize {
        self.object_slots.len()
    }

    pub fn method(&self, object: u32, index: u32) -> Option<&Function> {
        let position = slot(&self.object_slots, object)?;
        let method = slot(&self.method_slots[position], index)?;
        Some(&self.schema.objects[position].methods[method])
    }

    /// Methods of an object in dispatch index order.
    pub fn methods(&self, object: u32) -> Vec<&Function> {
        match slot(&self.object_slots, object) {
            Some(position) => self.method_slots[position]
                .iter()
                .flatten()
                .map(|&i| &self.schema.objects[position].methods[i])
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn method_table_len(&self, object: u32) -> usize {
        slot(&self.object_slots, object)
            .map(|position| self.method_slots[position].len())
            .unwrap_or(0)
    }

    /// Case names of the enum a fallible function throws.
    pub fn error_cases(&self, enum_name: &str) -> Option<&[Case]> {
        match self.typedef(enum_name)? {
            TypeDef::Enum { cases, .. } => Some(cases),
            _ => None,
        }
    }

    /// Value checker bound to this registry's types.
    pub fn checker(&self) -> TypeChecker<'_> {
        TypeChecker::new(self)
    }
}

fn slot(slots: &[Option<usize>], index: u32) -> Option<usize> {
    slots.get(index as usize).copied().flatten()
}

fn slots(indices: impl Iterator<Item = Option<u32>>) -> Vec<Option<usize>> {
    let indices: Vec<u32> = indices.map(|i| i.unwrap_or(0)).collect();
    let len = indices.iter().map(|&i| i as usize + 1).max().unwrap_or(0);
    let mut table = vec![None; len];
    for (position, index) in indices.into_iter().enumerate() {
        table[index as usize] = Some(position);
    }
    table
}

/// Keep pinned indices, then hand out the lowest free ones in declaration order.
fn assign_indices<'a>(
    kind: &'static str,
    items: impl Iterator<Item = (String, &'a mut Option<u32>)>,
) -> Result<(), SchemaError> {
    let mut items: Vec<(String, &'a mut Option<u32>)> = items.collect();
    let mut taken: HashMap<u32, String> = HashMap::new();

    for (owner, index) in items.iter() {
        if let Some(index) = **index {
            if index > MAX_INDEX {
                return Err(SchemaError::IndexOutOfRange {
                    owner: owner.clone(),
                    index,
                });
            }
            if let Some(first) = taken.insert(index, owner.clone()) {
                return Err(SchemaError::DuplicateIndex {
                    kind,
                    index,
                    first,
                    second: owner.clone(),
                });
            }
        }
    }

    let used: BTreeSet<u32> = taken.keys().copied().collect();
    let mut next = 0u32;
    for (owner, index) in items.iter_mut() {
        if index.is_none() {
            while used.contains(&next) {
                next += 1;
            }
            if next > MAX_INDEX {
                return Err(SchemaError::IndexOutOfRange {
                    owner: owner.clone(),
                    index: next,
                });
            }
            **index = Some(next);
            next += 1;
        }
    }
    Ok(())
}

fn check_name(owner: &str, name: &str) -> Result<(), SchemaError> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        && !name.ends_with('-');
    if valid {
        Ok(())
    } else {
        Err(SchemaError::InvalidName {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }
}

fn check_members<'a>(
    owner: &str,
    names: impl Iterator<Item = &'a str>,
) -> Result<(), SchemaError> {
    let mut seen = BTreeSet::new();
    for name in names {
        check_name(owner, name)?;
        if !seen.insert(name) {
            return Err(SchemaError::DuplicateMember {
                owner: owner.to_string(),
                member: name.to_string(),
            });
        }
    }
    Ok(())
}

fn check_unique_names(schema: &Schema) -> Result<(), SchemaError> {
    // records, enums, aliases and objects share one namespace
    let mut type_names = BTreeSet::new();
    for def in &schema.types {
        check_name(def.kind_name(), def.name())?;
        if !type_names.insert(def.name()) {
            return Err(SchemaError::Duplicate {
                kind: "type",
                name: def.name().to_string(),
            });
        }
        match def {
            TypeDef::Record { name, fields } => {
                check_members(&format!("record {name}"), fields.iter().map(|f| f.name.as_str()))?
            }
            TypeDef::Enum { name, cases } => {
                check_members(&format!("enum {name}"), cases.iter().map(|c| c.name.as_str()))?
            }
            TypeDef::Alias { .. } => {}
        }
    }
    for object in &schema.objects {
        check_name("object", &object.name)?;
        if !type_names.insert(&object.name) {
            return Err(SchemaError::Duplicate {
                kind: "type",
                name: object.name.clone(),
            });
        }
    }

    let mut function_names = BTreeSet::new();
    for func in &schema.functions {
        check_name("function", &func.name)?;
        if !function_names.insert(&func.name) {
            return Err(SchemaError::Duplicate {
                kind: "function",
                name: func.name.clone(),
            });
        }
        check_members(
            &format!("function {}", func.name),
            func.params.iter().map(|p| p.name.as_str()),
        )?;
    }

    for object in &schema.objects {
        let owner = format!("object {}", object.name);
        check_members(&owner, object.methods.iter().map(|m| m.name.as_str()))?;
        for method in &object.methods {
            check_members(
                &format!("{owner}, method {}", method.name),
                method.params.iter().map(|p| p.name.as_str()),
            )?;
        }
        if let Some(ctor) = &object.constructor {
            check_members(
                &format!("{owner}, constructor"),
                ctor.params.iter().map(|p| p.name.as_str()),
            )?;
        }
    }
    Ok(())
}

fn collect_named<'a>(ty: &'a Type, out: &mut Vec<&'a str>) {
    match ty {
        Type::Named(name) => out.push(name),
        Type::Option(inner) | Type::List(inner) | Type::Boxed(inner) => collect_named(inner, out),
        Type::Map { key, value } => {
            collect_named(key, out);
            collect_named(value, out);
        }
        _ => {}
    }
}

fn check_alias_cycles(types: &[TypeDef]) -> Result<(), SchemaError> {
    let aliases: HashMap<&str, &Type> = types
        .iter()
        .filter_map(|def| match def {
            TypeDef::Alias { name, ty } => Some((name.as_str(), ty)),
            _ => None,
        })
        .collect();

    let edges = |name: &str| -> Vec<String> {
        let mut out = Vec::new();
        if let Some(ty) = aliases.get(name) {
            collect_named(ty, &mut out);
        }
        out.into_iter()
            .filter(|n| aliases.contains_key(n))
            .map(str::to_string)
            .collect()
    };

    let mut names: Vec<&str> = aliases.keys().copied().collect();
    names.sort_unstable();
    if let Some(cycle) = find_cycle(&names, edges) {
        return Err(SchemaError::AliasCycle { cycle });
    }
    Ok(())
}

/// Depth-first cycle search; returns the first cycle found as a name path.
fn find_cycle(roots: &[&str], edges: impl Fn(&str) -> Vec<String>) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit(
        name: &str,
        edges: &dyn Fn(&str) -> Vec<String>,
        marks: &mut HashMap<String, Mark>,
        stack: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        match marks.get(name) {
            Some(Mark::Done) => return None,
            Some(Mark::Visiting) => {
                let start = stack.iter().position(|n| n == name).unwrap_or(0);
                let mut cycle = stack[start..].to_vec();
                cycle.push(name.to_string());
                return Some(cycle);
            }
            None => {}
        }
        marks.insert(name.to_string(), Mark::Visiting);
        stack.push(name.to_string());
        for next in edges(name) {
            if let Some(cycle) = visit(&next, edges, marks, stack) {
                return Some(cycle);
            }
        }
        stack.pop();
        marks.insert(name.to_string(), Mark::Done);
        None
    }

    let mut marks = HashMap::new();
    for root in roots {
        let mut stack = Vec::new();
        if let Some(cycle) = visit(root, &edges, &mut marks, &mut stack) {
            return Some(cycle);
        }
    }
    None
}

/// Inline aliases, resolve object references, and check every name resolves.
fn normalize(schema: Schema) -> Result<Schema, SchemaError> {
    let aliases: HashMap<String, Type> = schema
        .types
        .iter()
        .filter_map(|def| match def {
            TypeDef::Alias { name, ty } => Some((name.clone(), ty.clone())),
            _ => None,
        })
        .collect();
    let enums: BTreeSet<String> = schema
        .types
        .iter()
        .filter(|def| matches!(def, TypeDef::Enum { .. }))
        .map(|def| def.name().to_string())
        .collect();
    let nominal: BTreeSet<String> = schema
        .types
        .iter()
        .filter(|def| !matches!(def, TypeDef::Alias { .. }))
        .map(|def| def.name().to_string())
        .collect();
    let objects: BTreeSet<String> = schema.objects.iter().map(|o| o.name.clone()).collect();

    let resolver = Resolver {
        aliases: &aliases,
        nominal: &nominal,
        objects: &objects,
    };

    let check_throws = |owner: &str, throws: &Option<String>| -> Result<(), SchemaError> {
        match throws {
            Some(name) if !enums.contains(name) => Err(SchemaError::InvalidThrows {
                owner: owner.to_string(),
                name: name.clone(),
            }),
            _ => Ok(()),
        }
    };

    let mut types = Vec::new();
    for def in &schema.types {
        match def {
            TypeDef::Alias { .. } => {}
            TypeDef::Record { name, fields } => {
                let fields = fields
                    .iter()
                    .map(|f| {
                        let owner = format!("record {name}, field {}", f.name);
                        Ok(Field::new(f.name.clone(), resolver.resolve(&owner, &f.ty)?))
                    })
                    .collect::<Result<Vec<_>, SchemaError>>()?;
                types.push(TypeDef::Record {
                    name: name.clone(),
                    fields,
                });
            }
            TypeDef::Enum { name, cases } => {
                let cases = cases
                    .iter()
                    .map(|c| {
                        let owner = format!("enum {name}, case {}", c.name);
                        let payload = match &c.payload {
                            Some(ty) => Some(resolver.resolve(&owner, ty)?),
                            None => None,
                        };
                        Ok(Case::new(c.name.clone(), payload))
                    })
                    .collect::<Result<Vec<_>, SchemaError>>()?;
                types.push(TypeDef::Enum {
                    name: name.clone(),
                    cases,
                });
            }
        }
    }

    let functions = schema
        .functions
        .iter()
        .map(|f| {
            let owner = format!("function {}", f.name);
            check_throws(&owner, &f.throws)?;
            resolver.resolve_function(&owner, f)
        })
        .collect::<Result<Vec<_>, SchemaError>>()?;

    let mut objects_out = Vec::new();
    for object in &schema.objects {
        let owner = format!("object {}", object.name);
        let constructor = match &object.constructor {
            Some(ctor) => {
                let ctor_owner = format!("{owner}, constructor");
                check_throws(&ctor_owner, &ctor.throws)?;
                Some(Constructor {
                    params: resolver.resolve_params(&ctor_owner, &ctor.params)?,
                    throws: ctor.throws.clone(),
                })
            }
            None => None,
        };
        let methods = object
            .methods
            .iter()
            .map(|m| {
                let method_owner = format!("{owner}, method {}", m.name);
                check_throws(&method_owner, &m.throws)?;
                resolver.resolve_function(&method_owner, m)
            })
            .collect::<Result<Vec<_>, SchemaError>>()?;
        objects_out.push(ObjectDef {
            name: object.name.clone(),
            index: object.index,
            constructor,
            methods,
        });
    }

    Ok(Schema {
        name: schema.name,
        version: schema.version,
        types,
        functions,
        objects: objects_out,
    })
}

struct Resolver<'a> {
    aliases: &'a HashMap<String, Type>,
    nominal: &'a BTreeSet<String>,
    objects: &'a BTreeSet<String>,
}

impl Resolver<'_> {
    fn resolve(&self, owner: &str, ty: &Type) -> Result<Type, SchemaError> {
        Ok(match ty {
            Type::Option(inner) => Type::option(self.resolve(owner, inner)?),
            Type::List(inner) => Type::list(self.resolve(owner, inner)?),
            Type::Boxed(inner) => Type::boxed(self.resolve(owner, inner)?),
            Type::Map { key, value } => {
                Type::map(self.resolve(owner, key)?, self.resolve(owner, value)?)
            }
            Type::Named(name) => {
                if let Some(target) = self.aliases.get(name) {
                    // alias cycles were rejected before normalization
                    self.resolve(owner, target)?
                } else if self.nominal.contains(name) {
                    Type::Named(name.clone())
                } else if self.objects.contains(name) {
                    Type::Object(name.clone())
                } else {
                    return Err(SchemaError::UndefinedType {
                        owner: owner.to_string(),
                        name: name.clone(),
                    });
                }
            }
            Type::Object(name) => {
                if !self.objects.contains(name) {
                    return Err(SchemaError::UndefinedObject {
                        owner: owner.to_string(),
                        name: name.clone(),
                    });
                }
                Type::Object(name.clone())
            }
            primitive => primitive.clone(),
        })
    }

    fn resolve_params(&self, owner: &str, params: &[Param]) -> Result<Vec<Param>, SchemaError> {
        params
            .iter()
            .map(|p| {
                let param_owner = format!("{owner}, param {}", p.name);
                Ok(Param::new(p.name.clone(), self.resolve(&param_owner, &p.ty)?))
            })
            .collect()
    }

    fn resolve_function(&self, owner: &str, func: &Function) -> Result<Function, SchemaError> {
        let returns = match &func.returns {
            Some(ty) => Some(self.resolve(&format!("{owner}, return"), ty)?),
            None => None,
        };
        Ok(Function {
            name: func.name.clone(),
            index: func.index,
            params: self.resolve_params(owner, &func.params)?,
            returns,
            throws: func.throws.clone(),
        })
    }
}

fn check_map_keys(schema: &Schema) -> Result<(), SchemaError> {
    fn walk(owner: &str, ty: &Type) -> Result<(), SchemaError> {
        match ty {
            Type::Map { key, value } => {
                if !key.is_hashable_primitive() {
                    return Err(SchemaError::InvalidMapKey {
                        owner: owner.to_string(),
                        ty: key.to_string(),
                    });
                }
                walk(owner, value)
            }
            Type::Option(inner) | Type::List(inner) | Type::Boxed(inner) => walk(owner, inner),
            _ => Ok(()),
        }
    }

    for def in &schema.types {
        match def {
            TypeDef::Record { name, fields } => {
                for f in fields {
                    walk(&format!("record {name}, field {}", f.name), &f.ty)?;
                }
            }
            TypeDef::Enum { name, cases } => {
                for c in cases {
                    if let Some(ty) = &c.payload {
                        walk(&format!("enum {name}, case {}", c.name), ty)?;
                    }
                }
            }
            TypeDef::Alias { .. } => {}
        }
    }
    let signatures = schema
        .functions
        .iter()
        .map(|f| (format!("function {}", f.name), f))
        .chain(schema.objects.iter().flat_map(|o| {
            o.methods
                .iter()
                .map(move |m| (format!("object {}, method {}", o.name, m.name), m))
        }));
    for (owner, func) in signatures {
        for p in &func.params {
            walk(&format!("{owner}, param {}", p.name), &p.ty)?;
        }
        if let Some(ty) = &func.returns {
            walk(&format!("{owner}, return"), ty)?;
        }
    }
    for object in &schema.objects {
        if let Some(ctor) = &object.constructor {
            for p in &ctor.params {
                walk(&format!("object {}, constructor, param {}", object.name, p.name), &p.ty)?;
            }
        }
    }
    Ok(())
}

/// Records and enums may only reach themselves through option, box or an object.
fn check_by_value_recursion(types: &[TypeDef]) -> Result<(), SchemaError> {
    fn by_value<'a>(ty: &'a Type, out: &mut Vec<&'a str>) {
        match ty {
            Type::Named(name) => out.push(name),
            Type::List(inner) => by_value(inner, out),
            Type::Map { key, value } => {
                by_value(key, out);
                by_value(value, out);
            }
            // option, box and objects are indirection points
            _ => {}
        }
    }

    let by_name: HashMap<&str, &TypeDef> = types.iter().map(|t| (t.name(), t)).collect();
    let edges = |name: &str| -> Vec<String> {
        let mut out = Vec::new();
        match by_name.get(name) {
            Some(TypeDef::Record { fields, .. }) => {
                for f in fields {
                    by_value(&f.ty, &mut out);
                }
            }
            Some(TypeDef::Enum { cases, .. }) => {
                for c in cases {
                    if let Some(ty) = &c.payload {
                        by_value(ty, &mut out);
                    }
                }
            }
            _ => {}
        }
        out.into_iter().map(str::to_string).collect()
    };

    let roots: Vec<&str> = types.iter().map(|t| t.name()).collect();
    match find_cycle(&roots, edges) {
        Some(cycle) => Err(SchemaError::RecursiveType {
            name: cycle[0].clone(),
            cycle,
        }),
        None => Ok(()),
    }
}
