//! DC (Distributed Class) schema interface.
//!
//! Spec §1 names the DC schema loader as an external collaborator: "the
//! core assumes such a loader exists and exposes field lookup by name and
//! by numeric index." [`DcLoader`] is that assumed interface. [`StaticDcLoader`]
//! is a small concrete registry covering the classes spec.md's end-to-end
//! scenarios name (`Account`, `DistributedToon`, `DistributedEstate`,
//! `DistributedHouse`, `DistributedPet`) so the rest of the workspace has
//! something real to compile and test against.

use std::collections::HashMap;

use crate::value::Value;

/// Per-field attribute flags (GLOSSARY).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldFlags {
    pub required: bool,
    pub db: bool,
    pub broadcast: bool,
    pub ownsend: bool,
    pub clsend: bool,
    pub ownrecv: bool,
    pub airecv: bool,
}

/// Whether a field is a plain parameter or an atomic (ordered-arguments) field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Parameter,
    Atomic,
    Molecular,
}

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub number: u16,
    pub name: String,
    pub flags: FieldFlags,
    pub kind: FieldKind,
    /// The value a freshly created object's `db` field defaults to.
    pub default: Value,
}

#[derive(Debug, Clone)]
pub struct DClass {
    pub number: u16,
    pub name: String,
    /// Fields inherited from parent classes, in declaration order; numeric
    /// field ids and emit order both key off this list.
    pub fields: Vec<FieldDef>,
}

impl DClass {
    pub fn field_by_name(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_by_number(&self, number: u16) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.number == number)
    }

    pub fn db_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.flags.db)
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.flags.required)
    }
}

/// The assumed external DC schema loader.
pub trait DcLoader: Send + Sync {
    fn class_by_name(&self, name: &str) -> Option<&DClass>;
    fn class_by_number(&self, number: u16) -> Option<&DClass>;
}

/// A fixed, in-memory DC loader covering the classes the core's scenarios
/// and tests exercise. A real deployment would substitute a generated
/// loader from a compiled `.dc` file; this one exists so the server crate
/// has a working default.
pub struct StaticDcLoader {
    by_name: HashMap<String, DClass>,
    by_number: HashMap<u16, String>,
}

impl StaticDcLoader {
    pub fn new() -> Self {
        let classes = vec![
            account_class(),
            distributed_toon_class(),
            distributed_estate_class(),
            distributed_house_class(),
            distributed_pet_class(),
        ];
        let mut by_name = HashMap::new();
        let mut by_number = HashMap::new();
        for class in classes {
            by_number.insert(class.number, class.name.clone());
            by_name.insert(class.name.clone(), class);
        }
        Self { by_name, by_number }
    }

    pub fn register(&mut self, class: DClass) {
        self.by_number.insert(class.number, class.name.clone());
        self.by_name.insert(class.name.clone(), class);
    }
}

impl Default for StaticDcLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl DcLoader for StaticDcLoader {
    fn class_by_name(&self, name: &str) -> Option<&DClass> {
        self.by_name.get(name)
    }

    fn class_by_number(&self, number: u16) -> Option<&DClass> {
        self.by_number.get(&number).and_then(|n| self.by_name.get(n))
    }
}

fn field(number: u16, name: &str, flags: FieldFlags, kind: FieldKind, default: Value) -> FieldDef {
    FieldDef {
        number,
        name: name.to_string(),
        flags,
        kind,
        default,
    }
}

fn account_class() -> DClass {
    let db = FieldFlags {
        db: true,
        ..Default::default()
    };
    DClass {
        number: 1,
        name: "Account".to_string(),
        fields: vec![
            field(1, "ACCOUNT_AV_SET", db, FieldKind::Atomic, Value::List(vec![Value::U64(0); 6])),
            field(2, "CREATED", db, FieldKind::Parameter, Value::Str(String::new())),
            field(3, "LAST_LOGIN", db, FieldKind::Parameter, Value::Str(String::new())),
            field(4, "ESTATE_ID", db, FieldKind::Parameter, Value::U64(0)),
            field(5, "HOUSE_ID_SET", db, FieldKind::Atomic, Value::List(vec![Value::U64(0); 6])),
        ],
    }
}

fn distributed_toon_class() -> DClass {
    let db_broadcast = FieldFlags {
        db: true,
        broadcast: true,
        required: true,
        ..Default::default()
    };
    let db_ownrecv = FieldFlags {
        db: true,
        ownrecv: true,
        ..Default::default()
    };
    let clsend_chat = FieldFlags {
        clsend: true,
        ownrecv: true,
        ..Default::default()
    };
    DClass {
        number: 2,
        name: "DistributedToon".to_string(),
        fields: vec![
            field(1, "setName", db_broadcast, FieldKind::Atomic, Value::Str(String::new())),
            field(2, "setDNAString", db_broadcast, FieldKind::Atomic, Value::Blob(bytes::Bytes::new())),
            field(3, "setPosIndex", db_ownrecv, FieldKind::Parameter, Value::U64(0)),
            field(4, "OwningAccount", db_ownrecv, FieldKind::Parameter, Value::U64(0)),
            field(5, "setFriendsList", db_ownrecv, FieldKind::Atomic, Value::List(vec![])),
            field(6, "setPetId", db_ownrecv, FieldKind::Parameter, Value::U64(0)),
            field(7, "setDISLid", db_ownrecv, FieldKind::Parameter, Value::U64(0)),
            field(8, "setTalk", clsend_chat, FieldKind::Atomic, Value::Str(String::new())),
        ],
    }
}

fn distributed_estate_class() -> DClass {
    DClass {
        number: 3,
        name: "DistributedEstate".to_string(),
        fields: vec![],
    }
}

fn distributed_house_class() -> DClass {
    let db = FieldFlags {
        db: true,
        broadcast: true,
        ..Default::default()
    };
    DClass {
        number: 4,
        name: "DistributedHouse".to_string(),
        fields: vec![
            field(1, "setName", db, FieldKind::Parameter, Value::Str(String::new())),
            field(2, "setAvatarId", db, FieldKind::Parameter, Value::U64(0)),
            field(3, "setColor", db, FieldKind::Parameter, Value::U64(0)),
        ],
    }
}

fn distributed_pet_class() -> DClass {
    let db = FieldFlags {
        db: true,
        broadcast: true,
        ..Default::default()
    };
    DClass {
        number: 5,
        name: "DistributedPet".to_string(),
        fields: vec![field(1, "setName", db, FieldKind::Parameter, Value::Str(String::new()))],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn looks_up_toon_fields_by_name_and_number() {
        let loader = StaticDcLoader::new();
        let toon = loader.class_by_name("DistributedToon").unwrap();
        assert_eq!(toon.field_by_name("setName").unwrap().number, 1);
        assert_eq!(toon.field_by_number(1).unwrap().name, "setName");
    }

    #[test]
    fn class_ordering_is_ascending_by_declared_number() {
        let loader = StaticDcLoader::new();
        assert!(loader.class_by_number(1).is_some());
        assert!(loader.class_by_number(2).unwrap().number > loader.class_by_number(1).unwrap().number);
    }
}
