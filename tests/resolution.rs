use std::rc::Rc;

use cindex::config::{Config, Memory};
use cindex::error::Failure;
use cindex::lex::{FileId, Kind};
use cindex::symbols::SymbolMap;
use cindex::types::{Arg, Builtin, Type};
use cindex::Unit;

fn parse<'i>(symbols: &'i SymbolMap<Kind>, text: &str) -> Result<Unit<'i>, Failure> {
    cindex::parse(symbols, &Config::cpp(), &Memory::default(), "a.cc", Rc::from(text.as_bytes()), &mut ())
}

#[test]
fn instances_are_memoized() {
    let symbols = SymbolMap::default();
    let text = "template <class T> struct A { T t; }; A<int> x; A<int> y; A<char> z;";
    let mut unit = parse(&symbols, text).unwrap();
    assert!(unit.problems.is_empty(), "{:?}", unit.problems);

    let ty = |unit: &Unit<'_>, name: &str| unit.type_of(unit.lookup(name)[0]);
    assert_eq!(ty(&unit, "x"), ty(&unit, "y"));
    assert_ne!(ty(&unit, "x"), ty(&unit, "z"));

    let instance = match *unit.table.types.get(ty(&unit, "x")) {
        Type::Class(instance) => { instance }
        ref other => { panic!("not an instance: {:?}", other) }
    };
    let a = unit.lookup("A")[0];
    let int = unit.table.types.builtin(Builtin::Int);
    assert_eq!(unit.instantiate(a, vec![Arg::Type(int)]).unwrap(), instance);
    assert_eq!(unit.qualified_name(instance), "A<int>");
}

#[test]
fn member_types_follow_arguments() {
    let symbols = SymbolMap::default();
    let mut unit = parse(&symbols, "template <class T> class A { T t; };").unwrap();
    let a = unit.lookup("A")[0];
    let t = unit.lookup("A::t")[0];
    assert!(matches!(*unit.table.types.get(unit.type_of(t)), Type::Param(_)));

    let int = unit.table.types.builtin(Builtin::Int);
    let instance = unit.instantiate(a, vec![Arg::Type(int)]).unwrap();
    let members = unit.member(instance, "t");
    assert_eq!(members.len(), 1);
    assert_eq!(unit.display_type(unit.type_of(members[0])), "int");
}

#[test]
fn ambiguous_partial_specialization() {
    let symbols = SymbolMap::default();
    let text = "template <class T1, class T2, int I> class A {};\n\
                template <class T1, class T2, int I> class A<T1*, T2, I> {};\n\
                template <class T1, class T2, int I> class A<T1, T2*, I> {};\n\
                A<int*, int*, 1> a;";
    match parse(&symbols, text) {
        Err(Failure::AmbiguousSpecialization { template, .. }) => { assert_eq!(template, "A"); }
        Err(other) => { panic!("unexpected failure: {}", other) }
        Ok(_) => { panic!("ambiguous specialization accepted") }
    }
}

#[test]
fn more_specialized_partial_wins() {
    let symbols = SymbolMap::default();
    let text = "template <class T> struct A { int a; };\n\
                template <class T> struct A<T*> { int b; };\n\
                A<int*> p; A<int> q;";
    let unit = parse(&symbols, text).unwrap();
    let class = |name: &str| match *unit.table.types.get(unit.type_of(unit.lookup(name)[0])) {
        Type::Class(class) => { class }
        ref other => { panic!("not an instance: {:?}", other) }
    };
    assert_eq!(unit.member(class("p"), "b").len(), 1);
    assert!(unit.member(class("p"), "a").is_empty());
    assert_eq!(unit.member(class("q"), "a").len(), 1);
}

#[test]
fn nested_scopes_by_offset() {
    let symbols = SymbolMap::default();
    let text = "int x;\nvoid f() {\n  char x;\n  { long x; x = 1; }\n  x = 2;\n}\n";
    let unit = parse(&symbols, text).unwrap();
    let xs = unit.lookup("f::x");
    assert_eq!(xs.len(), 2);

    let file = FileId(0);
    let at = |pattern: &str| text.find(pattern).unwrap();
    assert_eq!(unit.resolve(file, at("int x"), "x"), unit.lookup("x"));
    assert_eq!(unit.resolve(file, at("x = 1"), "x"), vec![xs[1]]);
    assert_eq!(unit.resolve(file, at("x = 2"), "x"), vec![xs[0]]);

    assert_eq!(unit.references_to(xs[1]).len(), 1);
    assert_eq!(unit.references_to(xs[0]).len(), 1);
    assert!(unit.references_to(unit.lookup("x")[0]).is_empty());
}

#[test]
fn using_directive_references_namespace() {
    let symbols = SymbolMap::default();
    let text = "namespace N { int v; }\nusing namespace N;\nint w = v;";
    let unit = parse(&symbols, text).unwrap();
    assert!(unit.problems.is_empty(), "{:?}", unit.problems);
    let n = unit.lookup("N")[0];
    let references = unit.references_to(n);
    assert_eq!(references.len(), 1);
    assert_eq!(references[0].loc.offset, text.find("N;").unwrap());
    assert_eq!(unit.references_to(unit.lookup("N::v")[0]).len(), 1);
}

#[test]
fn non_template_preferred() {
    let symbols = SymbolMap::default();
    let text = "int f(int);\ntemplate <class T> int f(T);\nvoid g() { f(1); f<int>(1); }";
    let unit = parse(&symbols, text).unwrap();
    assert!(unit.problems.is_empty(), "{:?}", unit.problems);
    let fs = unit.lookup("f");
    assert_eq!(fs.len(), 2);
    assert!(unit.table.is_template(fs[1]));

    let plain = unit.references_to(fs[0]);
    let template = unit.references_to(fs[1]);
    assert_eq!(plain.len(), 1);
    assert_eq!(template.len(), 1);
    assert!(plain[0].loc.offset < template[0].loc.offset);
}

#[test]
fn nested_template_ids_split_shift() {
    let symbols = SymbolMap::default();
    let text = "template <class T> struct A { T t; }; A<A<int>> x; const int s = 8 >> 2;";
    let unit = parse(&symbols, text).unwrap();
    assert!(unit.problems.is_empty(), "{:?}", unit.problems);
    let x = unit.lookup("x")[0];
    assert_eq!(unit.display_type(unit.type_of(x)), "A<A<int>>");

    let outer = match *unit.table.types.get(unit.type_of(x)) {
        Type::Class(outer) => { outer }
        ref other => { panic!("not an instance: {:?}", other) }
    };
    let t = unit.member(outer, "t")[0];
    assert_eq!(unit.display_type(unit.type_of(t)), "A<int>");
    assert_eq!(unit.decl(unit.lookup("s")[0]).value, Some(2));
}

#[test]
fn explicit_specialization_preempts_instantiation() {
    let symbols = SymbolMap::default();
    let text = "template <class T> struct A { int a; };\n\
                template <> struct A<int> { int z; };\n\
                A<int> i; A<char> c;";
    let unit = parse(&symbols, text).unwrap();
    assert!(unit.problems.is_empty(), "{:?}", unit.problems);
    let class = |name: &str| match *unit.table.types.get(unit.type_of(unit.lookup(name)[0])) {
        Type::Class(class) => { class }
        ref other => { panic!("not a class: {:?}", other) }
    };
    assert_eq!(unit.member(class("i"), "z").len(), 1);
    assert!(unit.member(class("i"), "a").is_empty());
    assert_eq!(unit.member(class("c"), "a").len(), 1);
    assert!(unit.member(class("c"), "z").is_empty());
}

#[test]
fn self_referential_member_stays_deferred() {
    let symbols = SymbolMap::default();
    let mut unit = parse(&symbols, "template <class T> struct L { L<T> *next; }; L<int> l;").unwrap();
    assert!(unit.problems.is_empty(), "{:?}", unit.problems);
    let l = unit.type_of(unit.lookup("l")[0]);
    let instance = match *unit.table.types.get(l) {
        Type::Class(instance) => { instance }
        ref other => { panic!("not an instance: {:?}", other) }
    };

    let next = unit.type_of(unit.member(instance, "next")[0]);
    let resolved = unit.resolve_type(next).unwrap();
    assert_eq!(unit.display_type(resolved), "L<int> *");
    let pointer = unit.table.types.pointer(l);
    assert_eq!(resolved, pointer);
}
