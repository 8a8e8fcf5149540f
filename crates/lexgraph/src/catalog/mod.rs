use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use crate::error::{LexError, Result};
use crate::schema::ast::{SchemaFile, annotation_value};
use crate::schema::parser::parse_schema;
use crate::types::{ClassId, FieldId, FieldKind, FieldKindFilter};

/// Field ids are `class_id * FIELD_ID_STRIDE + ordinal`.
pub const FIELD_ID_STRIDE: u32 = 1000;
/// Custom field ordinals start above this offset within a class's id block.
pub const CUSTOM_FIELD_BASE: u32 = 500;

fn field_id_in(class_id: ClassId, ordinal: u32) -> Result<FieldId> {
    class_id
        .checked_mul(FIELD_ID_STRIDE)
        .and_then(|base| base.checked_add(ordinal))
        .ok_or_else(|| {
            LexError::Catalog(format!("class id {} is too large for field ids", class_id))
        })
}

/// Schema metadata for one project: classes, inheritance, fields.
///
/// Steps and the repository consult this at runtime instead of hard-coding field
/// identifiers. Custom fields registered via [`Catalog::add_custom_field`] live in
/// the same tables as built-in fields.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    classes: HashMap<String, ClassDef>,
    class_names: HashMap<ClassId, String>,
    fields: BTreeMap<FieldId, FieldDef>,
}

#[derive(Debug, Clone)]
pub struct ClassDef {
    pub id: ClassId,
    pub name: String,
    pub base: Option<String>,
    pub is_abstract: bool,
    /// Direct subclasses in declaration order.
    pub subclasses: Vec<String>,
    /// Fields declared on this class (not inherited), in declaration order.
    pub fields: Vec<FieldId>,
    next_custom_ordinal: u32,
}

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub id: FieldId,
    pub name: String,
    pub class_name: String,
    pub kind: FieldKind,
    pub destination: Option<String>,
    pub is_custom: bool,
}

impl Catalog {
    pub fn from_schema_source(source: &str) -> Result<Self> {
        let schema = parse_schema(source)?;
        build_catalog(&schema)
    }

    pub fn class_exists(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub fn class(&self, name: &str) -> Result<&ClassDef> {
        self.classes
            .get(name)
            .ok_or_else(|| LexError::Catalog(format!("unknown class: {}", name)))
    }

    pub fn class_id(&self, name: &str) -> Result<ClassId> {
        self.class(name).map(|c| c.id)
    }

    pub fn class_name(&self, id: ClassId) -> Result<&str> {
        self.class_names
            .get(&id)
            .map(String::as_str)
            .ok_or_else(|| LexError::Catalog(format!("unknown class id: {}", id)))
    }

    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }

    pub fn base_class(&self, name: &str) -> Result<Option<&str>> {
        Ok(self.class(name)?.base.as_deref())
    }

    pub fn direct_subclasses(&self, name: &str) -> Result<Vec<&str>> {
        Ok(self
            .class(name)?
            .subclasses
            .iter()
            .map(String::as_str)
            .collect())
    }

    /// The class itself followed by every transitive subclass, breadth first.
    pub fn all_subclasses(&self, name: &str) -> Result<Vec<String>> {
        let root = self.class(name)?;
        let mut out = Vec::new();
        let mut queue = VecDeque::from([root.name.clone()]);
        let mut seen = HashSet::new();
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(def) = self.classes.get(&current) {
                queue.extend(def.subclasses.iter().cloned());
            }
            out.push(current);
        }
        Ok(out)
    }

    /// True when `class` is `ancestor` or inherits from it. Unknown names are never related.
    pub fn is_same_or_subclass(&self, class: &str, ancestor: &str) -> bool {
        let mut current = Some(class);
        let mut hops = 0usize;
        while let Some(name) = current {
            if name == ancestor {
                return self.classes.contains_key(name);
            }
            hops += 1;
            if hops > self.classes.len() {
                return false;
            }
            current = self.classes.get(name).and_then(|c| c.base.as_deref());
        }
        false
    }

    /// Looks up a field by name. Never errors: unknown classes and fields yield `None`
    /// because steps probe optimistically for fields that may not exist.
    pub fn field_id(&self, class: &str, field: &str, include_base_classes: bool) -> Option<FieldId> {
        let mut current = self.classes.get(class);
        while let Some(def) = current {
            if let Some(id) = def
                .fields
                .iter()
                .copied()
                .find(|id| self.fields.get(id).is_some_and(|f| f.name == field))
            {
                return Some(id);
            }
            if !include_base_classes {
                return None;
            }
            current = def.base.as_ref().and_then(|b| self.classes.get(b));
        }
        None
    }

    pub fn field(&self, id: FieldId) -> Result<&FieldDef> {
        self.fields
            .get(&id)
            .ok_or_else(|| LexError::Catalog(format!("unknown field id: {}", id)))
    }

    pub fn field_kind(&self, id: FieldId) -> Result<FieldKind> {
        self.field(id).map(|f| f.kind)
    }

    pub fn field_name(&self, id: FieldId) -> Result<&str> {
        self.field(id).map(|f| f.name.as_str())
    }

    /// The class that declares the field.
    pub fn field_class(&self, id: FieldId) -> Result<&str> {
        self.field(id).map(|f| f.class_name.as_str())
    }

    pub fn field_destination_class(&self, id: FieldId) -> Result<Option<&str>> {
        self.field(id).map(|f| f.destination.as_deref())
    }

    pub fn is_custom(&self, id: FieldId) -> Result<bool> {
        self.field(id).map(|f| f.is_custom)
    }

    /// Fields of a class matching `filter`. With `include_superclasses` the inherited
    /// fields come first, root class outermost.
    pub fn fields(
        &self,
        class_id: ClassId,
        include_superclasses: bool,
        filter: FieldKindFilter,
    ) -> Result<Vec<FieldId>> {
        let name = self.class_name(class_id)?;
        let mut chain = vec![self.class(name)?];
        if include_superclasses {
            while let Some(base) = chain.last().and_then(|c| c.base.clone()) {
                chain.push(self.class(&base)?);
                if chain.len() > self.classes.len() {
                    return Err(LexError::Catalog(format!(
                        "inheritance cycle through {}",
                        name
                    )));
                }
            }
        }

        let mut out = Vec::new();
        for def in chain.iter().rev() {
            for id in &def.fields {
                if filter.matches(self.field(*id)?.kind) {
                    out.push(*id);
                }
            }
        }
        Ok(out)
    }

    /// Custom fields in id order.
    pub fn custom_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.values().filter(|f| f.is_custom)
    }

    pub fn add_custom_field(
        &mut self,
        class: &str,
        field: &str,
        kind: FieldKind,
        destination: Option<&str>,
    ) -> Result<FieldId> {
        let class_id = self.class_id(class)?;
        if self.field_id(class, field, true).is_some() {
            return Err(LexError::Catalog(format!(
                "class {} already has a field named {}",
                class, field
            )));
        }
        let destination = match (kind.is_object(), destination) {
            (true, None) => {
                return Err(LexError::Catalog(format!(
                    "custom field {}.{} of kind {} requires a destination class",
                    class, field, kind
                )));
            }
            (true, Some(dest)) => {
                if !self.class_exists(dest) {
                    return Err(LexError::Catalog(format!(
                        "custom field {}.{} references unknown class {}",
                        class, field, dest
                    )));
                }
                Some(dest.to_string())
            }
            (false, _) => None,
        };

        let def = self
            .classes
            .get_mut(class)
            .ok_or_else(|| LexError::Catalog(format!("unknown class: {}", class)))?;
        let ordinal = def.next_custom_ordinal + 1;
        if ordinal >= FIELD_ID_STRIDE - CUSTOM_FIELD_BASE {
            return Err(LexError::Catalog(format!(
                "class {} has no room for more custom fields",
                class
            )));
        }
        let id = field_id_in(class_id, CUSTOM_FIELD_BASE + ordinal)?;
        def.next_custom_ordinal = ordinal;
        def.fields.push(id);

        self.fields.insert(
            id,
            FieldDef {
                id,
                name: field.to_string(),
                class_name: class.to_string(),
                kind,
                destination,
                is_custom: true,
            },
        );
        Ok(id)
    }
}

pub fn build_catalog(schema: &SchemaFile) -> Result<Catalog> {
    let mut classes: HashMap<String, ClassDef> = HashMap::new();
    let mut class_names: HashMap<ClassId, String> = HashMap::new();
    let mut fields = BTreeMap::new();

    // Explicit ids first so implicit allocation never collides with a later @id.
    let mut next_class_id = schema
        .classes
        .iter()
        .filter_map(|c| annotation_value(&c.annotations, "id"))
        .filter_map(|v| v.parse::<u32>().ok())
        .max()
        .map_or(Some(1), |max| max.checked_add(1));

    // First pass: classes and their own fields
    for decl in &schema.classes {
        if classes.contains_key(&decl.name) {
            return Err(LexError::Catalog(format!(
                "duplicate class: {}",
                decl.name
            )));
        }

        let id = match annotation_value(&decl.annotations, "id") {
            Some(v) => v
                .parse::<u32>()
                .map_err(|e| LexError::Catalog(format!("bad @id on {}: {}", decl.name, e)))?,
            None => {
                let id = next_class_id.ok_or_else(|| {
                    LexError::Catalog(format!("no class id left for {}", decl.name))
                })?;
                next_class_id = id.checked_add(1);
                id
            }
        };
        if let Some(prev) = class_names.get(&id) {
            return Err(LexError::Catalog(format!(
                "class id {} is used by both {} and {}",
                id, prev, decl.name
            )));
        }

        let mut own_fields = Vec::new();
        let mut seen_names = HashSet::new();
        for (idx, field) in decl.fields.iter().enumerate() {
            if !seen_names.insert(field.name.as_str()) {
                return Err(LexError::Catalog(format!(
                    "duplicate field {}.{}",
                    decl.name, field.name
                )));
            }
            let ordinal = match annotation_value(&field.annotations, "id") {
                Some(v) => v.parse::<u32>().map_err(|e| {
                    LexError::Catalog(format!("bad @id on {}.{}: {}", decl.name, field.name, e))
                })?,
                None => idx as u32 + 1,
            };
            if ordinal == 0 || ordinal >= CUSTOM_FIELD_BASE {
                return Err(LexError::Catalog(format!(
                    "field ordinal {} on {}.{} must be in 1..{}",
                    ordinal, decl.name, field.name, CUSTOM_FIELD_BASE
                )));
            }
            let field_id = field_id_in(id, ordinal)?;
            if fields.contains_key(&field_id) {
                return Err(LexError::Catalog(format!(
                    "field id {} on {}.{} is already taken",
                    field_id, decl.name, field.name
                )));
            }
            fields.insert(
                field_id,
                FieldDef {
                    id: field_id,
                    name: field.name.clone(),
                    class_name: decl.name.clone(),
                    kind: field.kind,
                    destination: field.destination.clone(),
                    is_custom: false,
                },
            );
            own_fields.push(field_id);
        }

        class_names.insert(id, decl.name.clone());
        classes.insert(
            decl.name.clone(),
            ClassDef {
                id,
                name: decl.name.clone(),
                base: decl.base.clone(),
                is_abstract: decl.annotations.iter().any(|a| a.name == "abstract"),
                subclasses: Vec::new(),
                fields: own_fields,
                next_custom_ordinal: 0,
            },
        );
    }

    // Second pass: validate references and wire subclasses
    for decl in &schema.classes {
        if let Some(base) = &decl.base {
            let base_def = classes.get_mut(base).ok_or_else(|| {
                LexError::Catalog(format!(
                    "class {} extends unknown class {}",
                    decl.name, base
                ))
            })?;
            base_def.subclasses.push(decl.name.clone());
        }
        for field in &decl.fields {
            if let Some(dest) = &field.destination {
                if !classes.contains_key(dest) {
                    return Err(LexError::Catalog(format!(
                        "field {}.{} references unknown class {}",
                        decl.name, field.name, dest
                    )));
                }
            }
        }
    }

    for decl in &schema.classes {
        let mut hops = 0usize;
        let mut current = decl.base.as_deref();
        while let Some(name) = current {
            if name == decl.name || hops > classes.len() {
                return Err(LexError::Catalog(format!(
                    "inheritance cycle through {}",
                    decl.name
                )));
            }
            hops += 1;
            current = classes.get(name).and_then(|c| c.base.as_deref());
        }
    }

    Ok(Catalog {
        classes,
        class_names,
        fields,
    })
}
