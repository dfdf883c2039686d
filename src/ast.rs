use std::fmt;

use crate::error::Problem;
use crate::lex::{FileId, Kind, Loc};
use crate::scope::{DeclId, DeclKind};
use crate::symbols::Symbol;

/// A declaration as reported to a requestor.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Entity<'i> {
    pub decl: DeclId,
    pub kind: DeclKind,
    pub name: Option<Symbol<'i, Kind>>,
    pub loc: Loc,
}

/// "This source location names that declaration."
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Reference<'i> {
    pub loc: Loc,
    pub name: Symbol<'i, Kind>,
    pub decl: DeclId,
}

/// Receives a parse in source order: `enter_*` and `exit_*` nest strictly, and `accept_*` always
/// falls between the enter and exit of the construct containing it.
#[allow(unused_variables)]
pub trait Requestor<'i> {
    fn enter_translation_unit(&mut self, name: &str) {}
    fn exit_translation_unit(&mut self) {}
    fn enter_inclusion(&mut self, name: &str, file: FileId, loc: Loc) {}
    fn exit_inclusion(&mut self, file: FileId) {}
    fn enter_namespace(&mut self, entity: &Entity<'i>) {}
    fn exit_namespace(&mut self) {}
    fn enter_class_specifier(&mut self, entity: &Entity<'i>) {}
    fn exit_class_specifier(&mut self) {}
    fn enter_linkage(&mut self, linkage: &str, loc: Loc) {}
    fn exit_linkage(&mut self) {}
    fn enter_template_declaration(&mut self, loc: Loc) {}
    fn exit_template_declaration(&mut self) {}
    fn enter_template_specialization(&mut self, loc: Loc) {}
    fn exit_template_specialization(&mut self) {}
    fn enter_function_body(&mut self, entity: &Entity<'i>) {}
    fn exit_function_body(&mut self) {}
    fn enter_code_block(&mut self, loc: Loc) {}
    fn exit_code_block(&mut self) {}

    fn accept_variable(&mut self, entity: &Entity<'i>) {}
    fn accept_typedef(&mut self, entity: &Entity<'i>) {}
    fn accept_field(&mut self, entity: &Entity<'i>) {}
    /// Functions, methods, constructors and destructors, whether or not they have a body.
    fn accept_function(&mut self, entity: &Entity<'i>) {}
    fn accept_enumeration(&mut self, entity: &Entity<'i>) {}
    fn accept_enumerator(&mut self, entity: &Entity<'i>) {}
    fn accept_using_declaration(&mut self, name: Symbol<'i, Kind>, targets: &[DeclId], loc: Loc) {}
    fn accept_using_directive(&mut self, namespace: Option<DeclId>, loc: Loc) {}
    fn accept_asm(&mut self, text: &str, loc: Loc) {}
    fn accept_macro(&mut self, name: Symbol<'i, Kind>, loc: Loc, function_like: bool) {}
    fn accept_reference(&mut self, reference: &Reference<'i>) {}

    /// Report a recoverable problem. Returning `false` aborts the parse.
    fn accept_problem(&mut self, problem: &Problem) -> bool { true }
}

/// A requestor that ignores everything.
impl<'i> Requestor<'i> for () {}

/// One requestor call, as a value. The parser holds these back while it speculates.
#[derive(Clone, PartialEq, Debug)]
pub enum Event<'i> {
    EnterTranslationUnit(String),
    ExitTranslationUnit,
    EnterInclusion { name: String, file: FileId, loc: Loc },
    ExitInclusion(FileId),
    EnterNamespace(Entity<'i>),
    ExitNamespace,
    EnterClassSpecifier(Entity<'i>),
    ExitClassSpecifier,
    EnterLinkage(String, Loc),
    ExitLinkage,
    EnterTemplateDeclaration(Loc),
    ExitTemplateDeclaration,
    EnterTemplateSpecialization(Loc),
    ExitTemplateSpecialization,
    EnterFunctionBody(Entity<'i>),
    ExitFunctionBody,
    EnterCodeBlock(Loc),
    ExitCodeBlock,
    Variable(Entity<'i>),
    Typedef(Entity<'i>),
    Field(Entity<'i>),
    Function(Entity<'i>),
    Enumeration(Entity<'i>),
    Enumerator(Entity<'i>),
    UsingDeclaration { name: Symbol<'i, Kind>, targets: Vec<DeclId>, loc: Loc },
    UsingDirective { namespace: Option<DeclId>, loc: Loc },
    Asm(String, Loc),
    Macro { name: Symbol<'i, Kind>, loc: Loc, function_like: bool },
    Reference(Reference<'i>),
    Problem(Problem),
}

impl<'i> Event<'i> {
    /// Make the call this event stands for. Returns `false` if the requestor rejected a problem.
    pub fn deliver(&self, requestor: &mut dyn Requestor<'i>) -> bool {
        match *self {
            Event::EnterTranslationUnit(ref name) => { requestor.enter_translation_unit(name); }
            Event::ExitTranslationUnit => { requestor.exit_translation_unit(); }
            Event::EnterInclusion { ref name, file, loc } => { requestor.enter_inclusion(name, file, loc); }
            Event::ExitInclusion(file) => { requestor.exit_inclusion(file); }
            Event::EnterNamespace(ref entity) => { requestor.enter_namespace(entity); }
            Event::ExitNamespace => { requestor.exit_namespace(); }
            Event::EnterClassSpecifier(ref entity) => { requestor.enter_class_specifier(entity); }
            Event::ExitClassSpecifier => { requestor.exit_class_specifier(); }
            Event::EnterLinkage(ref linkage, loc) => { requestor.enter_linkage(linkage, loc); }
            Event::ExitLinkage => { requestor.exit_linkage(); }
            Event::EnterTemplateDeclaration(loc) => { requestor.enter_template_declaration(loc); }
            Event::ExitTemplateDeclaration => { requestor.exit_template_declaration(); }
            Event::EnterTemplateSpecialization(loc) => { requestor.enter_template_specialization(loc); }
            Event::ExitTemplateSpecialization => { requestor.exit_template_specialization(); }
            Event::EnterFunctionBody(ref entity) => { requestor.enter_function_body(entity); }
            Event::ExitFunctionBody => { requestor.exit_function_body(); }
            Event::EnterCodeBlock(loc) => { requestor.enter_code_block(loc); }
            Event::ExitCodeBlock => { requestor.exit_code_block(); }
            Event::Variable(ref entity) => { requestor.accept_variable(entity); }
            Event::Typedef(ref entity) => { requestor.accept_typedef(entity); }
            Event::Field(ref entity) => { requestor.accept_field(entity); }
            Event::Function(ref entity) => { requestor.accept_function(entity); }
            Event::Enumeration(ref entity) => { requestor.accept_enumeration(entity); }
            Event::Enumerator(ref entity) => { requestor.accept_enumerator(entity); }
            Event::UsingDeclaration { name, ref targets, loc } => {
                requestor.accept_using_declaration(name, targets, loc);
            }
            Event::UsingDirective { namespace, loc } => { requestor.accept_using_directive(namespace, loc); }
            Event::Asm(ref text, loc) => { requestor.accept_asm(text, loc); }
            Event::Macro { name, loc, function_like } => { requestor.accept_macro(name, loc, function_like); }
            Event::Reference(ref reference) => { requestor.accept_reference(reference); }
            Event::Problem(ref problem) => { return requestor.accept_problem(problem); }
        }
        true
    }

    /// +1 for an enter, -1 for an exit.
    pub fn depth_change(&self) -> isize {
        match *self {
            Event::EnterTranslationUnit(_) | Event::EnterInclusion { .. } | Event::EnterNamespace(_) |
            Event::EnterClassSpecifier(_) | Event::EnterLinkage(..) | Event::EnterTemplateDeclaration(_) |
            Event::EnterTemplateSpecialization(_) | Event::EnterFunctionBody(_) | Event::EnterCodeBlock(_) => { 1 }
            Event::ExitTranslationUnit | Event::ExitInclusion(_) | Event::ExitNamespace |
            Event::ExitClassSpecifier | Event::ExitLinkage | Event::ExitTemplateDeclaration |
            Event::ExitTemplateSpecialization | Event::ExitFunctionBody | Event::ExitCodeBlock => { -1 }
            _ => { 0 }
        }
    }
}

/// Records every event.
#[derive(Default)]
pub struct Events<'i> { pub events: Vec<Event<'i>> }

macro_rules! record {
    ($($method:ident($($arg:ident: $ty:ty),*) => $event:expr;)*) => {
        $(fn $method(&mut self, $($arg: $ty),*) { self.events.push($event); })*
    };
}

impl<'i> Requestor<'i> for Events<'i> {
    record! {
        enter_translation_unit(name: &str) => Event::EnterTranslationUnit(name.to_owned());
        exit_translation_unit() => Event::ExitTranslationUnit;
        enter_inclusion(name: &str, file: FileId, loc: Loc) => Event::EnterInclusion { name: name.to_owned(), file, loc };
        exit_inclusion(file: FileId) => Event::ExitInclusion(file);
        enter_namespace(entity: &Entity<'i>) => Event::EnterNamespace(*entity);
        exit_namespace() => Event::ExitNamespace;
        enter_class_specifier(entity: &Entity<'i>) => Event::EnterClassSpecifier(*entity);
        exit_class_specifier() => Event::ExitClassSpecifier;
        enter_linkage(linkage: &str, loc: Loc) => Event::EnterLinkage(linkage.to_owned(), loc);
        exit_linkage() => Event::ExitLinkage;
        enter_template_declaration(loc: Loc) => Event::EnterTemplateDeclaration(loc);
        exit_template_declaration() => Event::ExitTemplateDeclaration;
        enter_template_specialization(loc: Loc) => Event::EnterTemplateSpecialization(loc);
        exit_template_specialization() => Event::ExitTemplateSpecialization;
        enter_function_body(entity: &Entity<'i>) => Event::EnterFunctionBody(*entity);
        exit_function_body() => Event::ExitFunctionBody;
        enter_code_block(loc: Loc) => Event::EnterCodeBlock(loc);
        exit_code_block() => Event::ExitCodeBlock;
        accept_variable(entity: &Entity<'i>) => Event::Variable(*entity);
        accept_typedef(entity: &Entity<'i>) => Event::Typedef(*entity);
        accept_field(entity: &Entity<'i>) => Event::Field(*entity);
        accept_function(entity: &Entity<'i>) => Event::Function(*entity);
        accept_enumeration(entity: &Entity<'i>) => Event::Enumeration(*entity);
        accept_enumerator(entity: &Entity<'i>) => Event::Enumerator(*entity);
        accept_using_declaration(name: Symbol<'i, Kind>, targets: &[DeclId], loc: Loc) =>
            Event::UsingDeclaration { name, targets: targets.to_vec(), loc };
        accept_using_directive(namespace: Option<DeclId>, loc: Loc) => Event::UsingDirective { namespace, loc };
        accept_asm(text: &str, loc: Loc) => Event::Asm(text.to_owned(), loc);
        accept_macro(name: Symbol<'i, Kind>, loc: Loc, function_like: bool) => Event::Macro { name, loc, function_like };
        accept_reference(reference: &Reference<'i>) => Event::Reference(*reference);
    }

    fn accept_problem(&mut self, problem: &Problem) -> bool {
        self.events.push(Event::Problem(problem.clone()));
        true
    }
}

/// Counts events by category.
#[derive(Copy, Clone, Default, PartialEq, Eq, Debug)]
pub struct Counter {
    pub scopes: usize,
    pub declarations: usize,
    pub references: usize,
    pub macros: usize,
    pub problems: usize,
}

impl<'i> Requestor<'i> for Counter {
    fn enter_namespace(&mut self, _: &Entity<'i>) { self.scopes += 1; }
    fn enter_class_specifier(&mut self, _: &Entity<'i>) { self.scopes += 1; }
    fn enter_linkage(&mut self, _: &str, _: Loc) { self.scopes += 1; }
    fn enter_template_declaration(&mut self, _: Loc) { self.scopes += 1; }
    fn enter_template_specialization(&mut self, _: Loc) { self.scopes += 1; }
    fn enter_function_body(&mut self, _: &Entity<'i>) { self.scopes += 1; }
    fn enter_code_block(&mut self, _: Loc) { self.scopes += 1; }
    fn accept_variable(&mut self, _: &Entity<'i>) { self.declarations += 1; }
    fn accept_typedef(&mut self, _: &Entity<'i>) { self.declarations += 1; }
    fn accept_field(&mut self, _: &Entity<'i>) { self.declarations += 1; }
    fn accept_function(&mut self, _: &Entity<'i>) { self.declarations += 1; }
    fn accept_enumeration(&mut self, _: &Entity<'i>) { self.declarations += 1; }
    fn accept_enumerator(&mut self, _: &Entity<'i>) { self.declarations += 1; }
    fn accept_macro(&mut self, _: Symbol<'i, Kind>, _: Loc, _: bool) { self.macros += 1; }
    fn accept_reference(&mut self, _: &Reference<'i>) { self.references += 1; }
    fn accept_problem(&mut self, _: &Problem) -> bool { self.problems += 1; true }
}

/// A flat list of declared names, in declaration order.
#[derive(Default)]
pub struct Lister { pub names: Vec<(DeclKind, String)> }

impl Lister {
    fn push(&mut self, entity: &Entity<'_>) {
        let name = entity.name.map_or_else(String::default, |name| name.as_str().to_owned());
        self.names.push((entity.kind, name));
    }
}

impl<'i> Requestor<'i> for Lister {
    fn enter_namespace(&mut self, entity: &Entity<'i>) { self.push(entity); }
    fn enter_class_specifier(&mut self, entity: &Entity<'i>) { self.push(entity); }
    fn accept_variable(&mut self, entity: &Entity<'i>) { self.push(entity); }
    fn accept_typedef(&mut self, entity: &Entity<'i>) { self.push(entity); }
    fn accept_field(&mut self, entity: &Entity<'i>) { self.push(entity); }
    fn accept_function(&mut self, entity: &Entity<'i>) { self.push(entity); }
    fn accept_enumeration(&mut self, entity: &Entity<'i>) { self.push(entity); }
    fn accept_enumerator(&mut self, entity: &Entity<'i>) { self.push(entity); }
}

/// An owned tree of the scopes and declarations a parse reports.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Node {
    pub label: String,
    pub children: Vec<Node>,
}

/// Builds a [`Node`] tree. References and problems are left out.
pub struct Tree { stack: Vec<Node> }

impl Default for Tree {
    fn default() -> Tree {
        Tree { stack: vec![Node { label: "translation unit".to_owned(), children: Vec::default() }] }
    }
}

impl Tree {
    fn enter(&mut self, label: String) {
        self.stack.push(Node { label, children: Vec::default() });
    }

    fn exit(&mut self) {
        if self.stack.len() < 2 { return; }
        if let Some(node) = self.stack.pop() { self.leaf_node(node); }
    }

    fn leaf(&mut self, label: String) {
        self.leaf_node(Node { label, children: Vec::default() });
    }

    fn leaf_node(&mut self, node: Node) {
        if let Some(parent) = self.stack.last_mut() { parent.children.push(node); }
    }

    fn entity(entity: &Entity<'_>) -> String {
        match entity.name {
            Some(name) => { format!("{} {}", entity.kind.name(), name) }
            None => { format!("{} (anonymous)", entity.kind.name()) }
        }
    }

    /// The finished tree. Scopes left open are closed.
    pub fn finish(mut self) -> Node {
        while self.stack.len() > 1 { self.exit(); }
        self.stack.pop().unwrap_or(Node { label: String::default(), children: Vec::default() })
    }
}

impl<'i> Requestor<'i> for Tree {
    fn enter_translation_unit(&mut self, name: &str) {
        if let Some(root) = self.stack.first_mut() { root.label = format!("translation unit {}", name); }
    }
    fn enter_inclusion(&mut self, name: &str, _: FileId, _: Loc) { self.enter(format!("include {}", name)); }
    fn exit_inclusion(&mut self, _: FileId) { self.exit(); }
    fn enter_namespace(&mut self, entity: &Entity<'i>) { self.enter(Tree::entity(entity)); }
    fn exit_namespace(&mut self) { self.exit(); }
    fn enter_class_specifier(&mut self, entity: &Entity<'i>) { self.enter(Tree::entity(entity)); }
    fn exit_class_specifier(&mut self) { self.exit(); }
    fn enter_linkage(&mut self, linkage: &str, _: Loc) { self.enter(format!("extern {}", linkage)); }
    fn exit_linkage(&mut self) { self.exit(); }
    fn enter_template_declaration(&mut self, _: Loc) { self.enter("template".to_owned()); }
    fn exit_template_declaration(&mut self) { self.exit(); }
    fn enter_template_specialization(&mut self, _: Loc) { self.enter("template <>".to_owned()); }
    fn exit_template_specialization(&mut self) { self.exit(); }
    fn enter_function_body(&mut self, _: &Entity<'i>) { self.enter("body".to_owned()); }
    fn exit_function_body(&mut self) { self.exit(); }
    fn enter_code_block(&mut self, _: Loc) { self.enter("block".to_owned()); }
    fn exit_code_block(&mut self) { self.exit(); }
    fn accept_variable(&mut self, entity: &Entity<'i>) { self.leaf(Tree::entity(entity)); }
    fn accept_typedef(&mut self, entity: &Entity<'i>) { self.leaf(Tree::entity(entity)); }
    fn accept_field(&mut self, entity: &Entity<'i>) { self.leaf(Tree::entity(entity)); }
    fn accept_function(&mut self, entity: &Entity<'i>) { self.leaf(Tree::entity(entity)); }
    fn accept_enumeration(&mut self, entity: &Entity<'i>) { self.leaf(Tree::entity(entity)); }
    fn accept_enumerator(&mut self, entity: &Entity<'i>) { self.leaf(Tree::entity(entity)); }
    fn accept_using_declaration(&mut self, name: Symbol<'i, Kind>, _: &[DeclId], _: Loc) {
        self.leaf(format!("using {}", name));
    }
    fn accept_using_directive(&mut self, _: Option<DeclId>, _: Loc) { self.leaf("using namespace".to_owned()); }
    fn accept_asm(&mut self, text: &str, _: Loc) { self.leaf(format!("asm {}", text)); }
    fn accept_macro(&mut self, name: Symbol<'i, Kind>, _: Loc, _: bool) { self.leaf(format!("macro {}", name)); }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn write(f: &mut fmt::Formatter<'_>, node: &Node, depth: usize) -> fmt::Result {
            writeln!(f, "{:indent$}{}", "", node.label, indent = depth * 2)?;
            for child in &node.children { write(f, child, depth + 1)?; }
            Ok(())
        }
        write(f, self, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::{Counter, Entity, Event, Events, Lister, Requestor, Tree};
    use crate::error::{Problem, ProblemKind};
    use crate::lex::{Kind, Loc};
    use crate::scope::{DeclId, DeclKind};
    use crate::symbols::SymbolMap;

    #[test]
    fn tree() {
        let symbols = SymbolMap::default();
        let n = symbols.intern(b"N", Kind::Identifier);
        let x = symbols.intern(b"x", Kind::Identifier);
        let namespace = Entity { decl: DeclId(0), kind: DeclKind::Namespace, name: Some(n), loc: Loc::default() };
        let variable = Entity { decl: DeclId(1), kind: DeclKind::Variable, name: Some(x), loc: Loc::default() };

        let mut tree = Tree::default();
        tree.enter_translation_unit("a.cc");
        tree.enter_namespace(&namespace);
        tree.accept_variable(&variable);
        tree.exit_namespace();
        tree.exit_translation_unit();
        let node = tree.finish();
        assert_eq!(node.to_string(), "translation unit a.cc\n  namespace N\n    variable x\n");
    }

    #[test]
    fn deliver() {
        let symbols = SymbolMap::default();
        let x = symbols.intern(b"x", Kind::Identifier);
        let entity = Entity { decl: DeclId(0), kind: DeclKind::Field, name: Some(x), loc: Loc::default() };
        let problem = Problem::new(ProblemKind::Syntax, Loc::default(), "");
        let events = vec![
            Event::EnterCodeBlock(Loc::default()),
            Event::Field(entity),
            Event::Problem(problem),
            Event::ExitCodeBlock,
        ];

        let mut recorded = Events::default();
        let mut counter = Counter::default();
        let mut lister = Lister::default();
        for event in &events {
            assert!(event.deliver(&mut recorded));
            assert!(event.deliver(&mut counter));
            event.deliver(&mut lister);
        }
        assert_eq!(recorded.events, events);
        assert_eq!(counter, Counter { scopes: 1, declarations: 1, problems: 1, ..Counter::default() });
        assert_eq!(lister.names, [(DeclKind::Field, "x".to_owned())]);
        assert_eq!(events.iter().map(Event::depth_change).sum::<isize>(), 0);
    }
}
