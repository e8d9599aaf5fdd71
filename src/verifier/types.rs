//! Verification type lattice and the class hierarchy it consults
//!
//! [Verification type hierarchy](https://docs.oracle.com/javase/specs/jvms/se8/html/jvms-4.html#jvms-4.10.1.2)

use crate::classfile::{BaseType, FieldType, RefType};
use std::collections::{HashMap, HashSet};

/// Identity of a subroutine, as allocated by the inferencing verifier
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct SubroutineId(pub u16);

impl SubroutineId {
    /// Stands for the collapse of two different subroutine identities at a
    /// merge point; always the first entry of the subroutine pool
    pub const MERGED: SubroutineId = SubroutineId(0);
}

/// An element of the verification type lattice
///
/// `Category1`, `Category2` and `AnyReference` are assertion types: they show
/// up as expected operands of instructions but never inside a frame.
#[derive(Clone, PartialEq, Debug)]
pub enum VerificationType {
    /// Unusable or unknown value; the top of the lattice
    Top,
    Integer,
    Float,
    Long,
    Double,
    /// Second slot of a `Long` or `Double` value
    Second,
    Null,
    Reference(RefType),
    /// Value made by the `new` instruction at the given position, before its
    /// constructor has run
    Uninitialized(u32),
    /// `this` inside a constructor, before the superclass constructor ran
    UninitializedThis,
    /// Return address pushed by `jsr`
    ReturnAddress(SubroutineId),
    /// Matches any one-slot value
    Category1,
    /// Matches `Long` or `Double`
    Category2,
    /// Matches any reference-like value, including uninitialized ones and
    /// return addresses
    AnyReference,
}

impl VerificationType {
    pub fn object(name: impl Into<String>) -> VerificationType {
        VerificationType::Reference(RefType::Object(name.into()))
    }

    /// Stack or local slots occupied
    pub fn width(&self) -> usize {
        match self {
            VerificationType::Long
            | VerificationType::Double
            | VerificationType::Category2 => 2,
            _ => 1,
        }
    }

    pub fn is_reference_like(&self) -> bool {
        matches!(
            self,
            VerificationType::Null
                | VerificationType::Reference(_)
                | VerificationType::Uninitialized(_)
                | VerificationType::UninitializedThis
                | VerificationType::ReturnAddress(_)
        )
    }

    pub fn is_uninitialized(&self) -> bool {
        matches!(
            self,
            VerificationType::Uninitialized(_) | VerificationType::UninitializedThis
        )
    }

    /// The lattice element for a declared field or parameter type
    pub fn of_field(field_type: &FieldType) -> VerificationType {
        match field_type {
            FieldType::Base(BaseType::Long) => VerificationType::Long,
            FieldType::Base(BaseType::Double) => VerificationType::Double,
            FieldType::Base(BaseType::Float) => VerificationType::Float,
            FieldType::Base(_) => VerificationType::Integer,
            FieldType::Ref(ref_type) => VerificationType::Reference(ref_type.clone()),
        }
    }

    /// Can a value of type `other` stand wherever `self` is required?
    pub fn is_assignable_from(&self, other: &VerificationType, graph: &ClassGraph) -> bool {
        if self == other {
            return true;
        }
        match (self, other) {
            (VerificationType::Top, _) => true,
            (_, VerificationType::Second) => false,
            (VerificationType::Category1, other) => other.width() == 1,
            (VerificationType::Category2, other) => {
                matches!(other, VerificationType::Long | VerificationType::Double)
            }
            (VerificationType::AnyReference, other) => other.is_reference_like(),
            (VerificationType::Reference(_), VerificationType::Null) => true,
            (VerificationType::Reference(supertype), VerificationType::Reference(subtype)) => {
                graph.is_assignable(subtype, supertype)
            }
            _ => false,
        }
    }

    /// Lattice join, used when control flow paths meet
    pub fn merge_with(&self, other: &VerificationType, graph: &ClassGraph) -> VerificationType {
        if self == other {
            return self.clone();
        }
        match (self, other) {
            (VerificationType::Null, merged @ VerificationType::Reference(_))
            | (merged @ VerificationType::Reference(_), VerificationType::Null) => merged.clone(),
            (VerificationType::Reference(a), VerificationType::Reference(b)) => {
                VerificationType::Reference(graph.join(a, b))
            }
            (VerificationType::ReturnAddress(_), VerificationType::ReturnAddress(_)) => {
                VerificationType::ReturnAddress(SubroutineId::MERGED)
            }
            _ => VerificationType::Top,
        }
    }
}

impl std::fmt::Display for VerificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            VerificationType::Top => f.write_str("top"),
            VerificationType::Integer => f.write_str("int"),
            VerificationType::Float => f.write_str("float"),
            VerificationType::Long => f.write_str("long"),
            VerificationType::Double => f.write_str("double"),
            VerificationType::Second => f.write_str("second word"),
            VerificationType::Null => f.write_str("null"),
            VerificationType::Reference(RefType::Object(name)) => f.write_str(name),
            VerificationType::Reference(array) => {
                write!(f, "{}", crate::classfile::RenderDescriptor::render(array))
            }
            VerificationType::Uninitialized(position) => {
                write!(f, "uninitialized(new at {})", position)
            }
            VerificationType::UninitializedThis => f.write_str("uninitialized this"),
            VerificationType::ReturnAddress(_) => f.write_str("return address"),
            VerificationType::Category1 => f.write_str("category 1 value"),
            VerificationType::Category2 => f.write_str("category 2 value"),
            VerificationType::AnyReference => f.write_str("reference"),
        }
    }
}

/// What the hierarchy knows about one class
#[derive(Clone, Debug, Default)]
pub struct ClassData {
    pub superclass: Option<String>,
    pub interfaces: Vec<String>,
    pub is_interface: bool,
    /// Protected fields and methods, keyed by name and descriptor
    pub protected_members: HashSet<(String, String)>,
}

/// Class hierarchy consulted for assignability and joins
///
/// Classes the graph has never heard of are treated pessimistically for
/// assignability (only a name match succeeds) and join to `java/lang/Object`.
/// Assignability to an interface always succeeds; the invokeinterface
/// contract is checked at run time, not here.
#[derive(Clone, Debug)]
pub struct ClassGraph {
    classes: HashMap<String, ClassData>,
}

impl ClassGraph {
    pub fn new() -> ClassGraph {
        let mut graph = ClassGraph {
            classes: HashMap::new(),
        };
        graph.seed_lang_types();
        graph
    }

    fn seed_lang_types(&mut self) {
        self.add_class(RefType::OBJECT, None::<String>, vec![], false);
        for interface in [RefType::CLONEABLE, RefType::SERIALIZABLE] {
            self.add_class(interface, Some(RefType::OBJECT), vec![], true);
        }
        for class in [
            RefType::STRING,
            RefType::CLASS,
            RefType::THROWABLE,
            RefType::METHOD_HANDLE,
            RefType::METHOD_TYPE,
            "java/lang/StringBuilder",
        ] {
            self.add_class(class, Some(RefType::OBJECT), vec![], false);
        }
        self.add_class("java/lang/Exception", Some(RefType::THROWABLE), vec![], false);
        self.add_class("java/lang/Error", Some(RefType::THROWABLE), vec![], false);
        self.add_class(
            "java/lang/RuntimeException",
            Some("java/lang/Exception"),
            vec![],
            false,
        );
    }

    pub fn add_class(
        &mut self,
        name: impl Into<String>,
        superclass: Option<impl Into<String>>,
        interfaces: Vec<String>,
        is_interface: bool,
    ) {
        self.classes.insert(
            name.into(),
            ClassData {
                superclass: superclass.map(Into::into),
                interfaces,
                is_interface,
                protected_members: HashSet::new(),
            },
        );
    }

    pub fn add_protected_member(
        &mut self,
        class: &str,
        name: impl Into<String>,
        descriptor: impl Into<String>,
    ) {
        if let Some(data) = self.classes.get_mut(class) {
            data.protected_members
                .insert((name.into(), descriptor.into()));
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub fn is_interface(&self, name: &str) -> bool {
        self.classes.get(name).map_or(false, |data| data.is_interface)
    }

    pub fn is_protected_member(&self, class: &str, name: &str, descriptor: &str) -> bool {
        self.classes.get(class).map_or(false, |data| {
            data.protected_members
                .contains(&(name.to_string(), descriptor.to_string()))
        })
    }

    /// Superclass chain starting at `name` itself
    ///
    /// Stops if a malformed hierarchy loops back on itself
    pub fn superchain<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        let mut seen = HashSet::new();
        let mut next = Some(name);
        std::iter::from_fn(move || {
            let current = next?;
            if !seen.insert(current) {
                return None;
            }
            next = self
                .classes
                .get(current)
                .and_then(|data| data.superclass.as_deref());
            Some(current)
        })
    }

    /// Does `sub` name `sup` anywhere along its superclass or interface edges?
    pub fn is_subtype_of(&self, sub: &str, sup: &str) -> bool {
        // Worklist walk over superclass and interface edges
        let mut queue = vec![sub];
        let mut seen = HashSet::new();
        while let Some(current) = queue.pop() {
            if current == sup {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(data) = self.classes.get(current) {
                if let Some(superclass) = &data.superclass {
                    queue.push(superclass);
                }
                queue.extend(data.interfaces.iter().map(String::as_str));
            }
        }
        false
    }

    pub fn is_assignable(&self, sub: &RefType, sup: &RefType) -> bool {
        match (sub, sup) {
            (_, RefType::Object(name)) if name == RefType::OBJECT => true,
            (RefType::Object(sub), RefType::Object(sup)) => {
                if sub == sup || self.is_interface(sup) {
                    return true;
                }
                self.is_subtype_of(sub, sup)
            }
            (RefType::Array(_), RefType::Object(name)) => {
                name == RefType::CLONEABLE || name == RefType::SERIALIZABLE
            }
            (RefType::Array(sub), RefType::Array(sup)) => match (&**sub, &**sup) {
                (a, b) if a == b => true,
                (FieldType::Ref(sub), FieldType::Ref(sup)) => self.is_assignable(sub, sup),
                _ => false,
            },
            (RefType::Object(_), RefType::Array(_)) => false,
        }
    }

    pub fn nearest_common_superclass(&self, a: &str, b: &str) -> String {
        if self.is_interface(a) || self.is_interface(b) {
            return RefType::OBJECT.to_string();
        }
        let ancestors: HashSet<&str> = self.superchain(a).collect();
        for candidate in self.superchain(b) {
            if ancestors.contains(candidate) && !self.is_interface(candidate) {
                return candidate.to_string();
            }
        }
        RefType::OBJECT.to_string()
    }

    /// Join of two reference types
    pub fn join(&self, a: &RefType, b: &RefType) -> RefType {
        match (a, b) {
            (a, b) if a == b => a.clone(),
            (RefType::Object(a), RefType::Object(b)) => {
                RefType::Object(self.nearest_common_superclass(a, b))
            }
            (RefType::Array(a), RefType::Array(b)) => match (&**a, &**b) {
                (FieldType::Ref(a), FieldType::Ref(b)) => {
                    RefType::array(FieldType::Ref(self.join(a, b)))
                }
                _ => RefType::object(RefType::OBJECT),
            },
            _ => RefType::object(RefType::OBJECT),
        }
    }

    /// Package part of a binary class name
    pub fn package_of(name: &str) -> &str {
        name.rsplit_once('/').map_or("", |(package, _)| package)
    }
}

impl Default for ClassGraph {
    fn default() -> ClassGraph {
        ClassGraph::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn graph_with_samples() -> ClassGraph {
        let mut graph = ClassGraph::new();
        graph.add_class("demo/Animal", Some(RefType::OBJECT), vec![], false);
        graph.add_class("demo/Cat", Some("demo/Animal"), vec![], false);
        graph.add_class("demo/Dog", Some("demo/Animal"), vec![], false);
        graph
    }

    #[test]
    fn seeded_lang_types() {
        let graph = ClassGraph::new();
        assert!(graph.contains(RefType::OBJECT));
        // Object is the rootless top of the seeded hierarchy
        assert_eq!(graph.superchain(RefType::OBJECT).count(), 1);
        assert!(graph.is_subtype_of(RefType::STRING, RefType::OBJECT));
        assert!(graph.is_interface(RefType::CLONEABLE));
        assert!(graph.is_subtype_of("java/lang/RuntimeException", RefType::THROWABLE));
    }

    #[test]
    fn assignability() {
        let graph = graph_with_samples();
        let cat = VerificationType::object("demo/Cat");
        let animal = VerificationType::object("demo/Animal");

        assert!(animal.is_assignable_from(&cat, &graph));
        assert!(!cat.is_assignable_from(&animal, &graph));
        assert!(animal.is_assignable_from(&VerificationType::Null, &graph));
        assert!(!animal.is_assignable_from(&VerificationType::Integer, &graph));
        assert!(VerificationType::Top.is_assignable_from(&VerificationType::Long, &graph));
    }

    #[test]
    fn assertion_types() {
        let graph = ClassGraph::new();
        assert!(VerificationType::Category1
            .is_assignable_from(&VerificationType::Integer, &graph));
        assert!(VerificationType::Category1
            .is_assignable_from(&VerificationType::Null, &graph));
        assert!(!VerificationType::Category1.is_assignable_from(&VerificationType::Long, &graph));
        assert!(VerificationType::Category2.is_assignable_from(&VerificationType::Double, &graph));
        assert!(VerificationType::AnyReference
            .is_assignable_from(&VerificationType::Uninitialized(4), &graph));
        assert!(!VerificationType::AnyReference
            .is_assignable_from(&VerificationType::Integer, &graph));
    }

    #[test]
    fn joins() {
        let graph = graph_with_samples();
        let cat = VerificationType::object("demo/Cat");
        let dog = VerificationType::object("demo/Dog");
        let animal = VerificationType::object("demo/Animal");

        assert_eq!(cat.merge_with(&dog, &graph), animal);
        assert_eq!(cat.merge_with(&VerificationType::Null, &graph), cat);
        assert_eq!(
            cat.merge_with(&VerificationType::Integer, &graph),
            VerificationType::Top,
        );
        assert_eq!(
            VerificationType::Integer.merge_with(&VerificationType::Float, &graph),
            VerificationType::Top,
        );
    }

    #[test]
    fn array_assignability() {
        let graph = graph_with_samples();
        let cats = RefType::array(FieldType::object("demo/Cat"));
        let animals = RefType::array(FieldType::object("demo/Animal"));
        let ints = RefType::array(FieldType::int());

        assert!(graph.is_assignable(&cats, &animals));
        assert!(!graph.is_assignable(&animals, &cats));
        assert!(!graph.is_assignable(&ints, &animals));
        assert!(graph.is_assignable(&ints, &RefType::object(RefType::CLONEABLE)));
        assert!(graph.is_assignable(&ints, &RefType::object(RefType::OBJECT)));
    }

    #[test]
    fn unknown_classes() {
        let graph = ClassGraph::new();
        let mystery = VerificationType::object("demo/Mystery");
        assert!(mystery.is_assignable_from(&mystery, &graph));
        assert!(!mystery.is_assignable_from(&VerificationType::object("demo/Other"), &graph));
        assert_eq!(
            mystery.merge_with(&VerificationType::object("demo/Other"), &graph),
            VerificationType::object(RefType::OBJECT),
        );
    }
}
