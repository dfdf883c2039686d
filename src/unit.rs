use crate::ast::Reference;
use crate::error::{Failure, Problem};
use crate::lex::{FileId, Kind};
use crate::scope::{Decl, DeclId, ScopeId, ScopeKind, Table};
use crate::symbols::{Symbol, SymbolMap};
use crate::types::{Arg, TypeId};

/// A parsed translation unit.
pub struct Unit<'i> {
    symbols: &'i SymbolMap<Kind>,
    pub table: Table<'i>,
    pub references: Vec<Reference<'i>>,
    pub problems: Vec<Problem>,
    /// Every file read, indexed by [`FileId`]. The main file comes first.
    pub files: Vec<String>,
}

impl<'i> Unit<'i> {
    pub(crate) fn new(
        symbols: &'i SymbolMap<Kind>, table: Table<'i>, references: Vec<Reference<'i>>,
        problems: Vec<Problem>, files: Vec<String>,
    ) -> Unit<'i> {
        Unit { symbols, table, references, problems, files }
    }

    pub fn decl(&self, id: DeclId) -> &Decl<'i> { self.table.decl(id) }

    /// The interned identifier `name`, if the unit ever mentioned it.
    pub fn symbol(&self, name: &str) -> Option<Symbol<'i, Kind>> {
        let symbols: &'i SymbolMap<Kind> = self.symbols;
        symbols.get(name.as_bytes())
    }

    pub fn file(&self, name: &str) -> Option<FileId> {
        self.files.iter().position(|file| file == name).map(|index| FileId(index as u32))
    }

    /// Declarations for a `::`-separated path from the global scope, such as `N::S::f`.
    ///
    /// A path may also step into a function: `f::x` finds the locals named `x` anywhere in the
    /// body of `f`, in declaration order.
    pub fn lookup(&self, path: &str) -> Vec<DeclId> {
        let path = path.strip_prefix("::").unwrap_or(path);
        let mut parts = path.split("::").peekable();
        let mut scope = ScopeId::GLOBAL;
        while let Some(part) = parts.next() {
            let name = match self.symbol(part.trim()) {
                Some(name) => { name }
                None => { return Vec::default(); }
            };
            if parts.peek().is_none() { return self.lookup_in(scope, name); }

            let found = self.lookup_in(scope, name);
            scope = match found.iter().find_map(|&id| self.table.members_scope(id)) {
                Some(scope) => { scope }
                None => { return Vec::default(); }
            };
        }
        Vec::default()
    }

    /// Qualified lookup, except that function bodies are searched through.
    fn lookup_in(&self, scope: ScopeId, name: Symbol<'i, Kind>) -> Vec<DeclId> {
        match self.table.scope(scope).kind {
            ScopeKind::Function | ScopeKind::Block => { self.locals(scope, name) }
            _ => { self.table.lookup_in(scope, name) }
        }
    }

    /// Declarations named `name` in `scope` or any scope nested in it.
    fn locals(&self, scope: ScopeId, name: Symbol<'i, Kind>) -> Vec<DeclId> {
        self.table.decls()
            .filter(|&(_, decl)| decl.name == Some(name) && self.within(decl.scope, scope))
            .map(|(id, _)| id)
            .collect()
    }

    fn within(&self, mut scope: ScopeId, ancestor: ScopeId) -> bool {
        loop {
            if scope == ancestor { return true; }
            scope = match self.table.scope(scope).parent {
                Some(parent) => { parent }
                None => { return false; }
            };
        }
    }

    /// Unqualified lookup of `name` as seen from `offset` in `file`.
    pub fn resolve(&self, file: FileId, offset: usize, name: &str) -> Vec<DeclId> {
        let name = match self.symbol(name) {
            Some(name) => { name }
            None => { return Vec::default(); }
        };
        let scope = self.table.scope_at(file, offset);
        self.table.lookup(scope, name)
    }

    /// Member lookup in a class, including its bases.
    pub fn member(&self, class: DeclId, name: &str) -> Vec<DeclId> {
        match self.symbol(name) {
            Some(name) => { self.table.member(class, name) }
            None => { Vec::default() }
        }
    }

    pub fn qualified_name(&self, id: DeclId) -> String { self.table.qualified_name(id) }

    /// Every reference to the entity `id` declares, through any of its declarations.
    pub fn references_to(&self, id: DeclId) -> Vec<&Reference<'i>> {
        let canonical = self.table.canonical(id);
        self.references.iter()
            .filter(|reference| self.table.canonical(reference.decl) == canonical)
            .collect()
    }

    pub fn type_of(&self, id: DeclId) -> TypeId { self.table.decl(id).ty }

    pub fn definition_of(&self, id: DeclId) -> Option<DeclId> { self.table.definition(id) }

    pub fn display_type(&self, ty: TypeId) -> String { self.table.display_type(ty) }

    /// The instance of the class template `template` for `args`, instantiating it if needed.
    pub fn instantiate(&mut self, template: DeclId, args: Vec<Arg>) -> Result<DeclId, Failure> {
        let loc = self.table.decl(template).loc;
        self.table.instantiate(template, args, loc)
    }

    /// Materialize any deferred specializations in `ty`.
    pub fn resolve_type(&mut self, ty: TypeId) -> Result<TypeId, Failure> {
        self.table.resolve_type(ty, Default::default())
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use crate::config::{Config, Memory};
    use crate::lex::FileId;
    use crate::scope::DeclKind;
    use crate::symbols::SymbolMap;

    #[test]
    fn paths() {
        let symbols = SymbolMap::default();
        let text = "namespace N { struct S { void f(); void f(int); int n; }; }\n\
                    namespace { int c; }\n\
                    void g() { int x; { int y; } }";
        let unit = crate::parse::parse(&symbols, &Config::cpp(), &Memory::default(), "a.cc", Rc::from(text.as_bytes()), &mut ())
            .unwrap();
        assert_eq!(unit.lookup("N::S::f").len(), 2);
        assert_eq!(unit.lookup("::N::S::n").len(), 1);
        assert_eq!(unit.lookup("c").len(), 1);
        assert_eq!(unit.lookup("g::x").len(), 1);
        assert_eq!(unit.lookup("g::y").len(), 1);
        assert!(unit.lookup("N::T").is_empty());
        assert!(unit.lookup("nowhere::x").is_empty());

        let s = unit.lookup("N::S")[0];
        assert_eq!(unit.decl(s).kind, DeclKind::Struct);
        assert_eq!(unit.member(s, "n"), unit.lookup("N::S::n"));
        assert_eq!(unit.qualified_name(unit.lookup("N::S::n")[0]), "N::S::n");
        assert_eq!(unit.file("a.cc"), Some(FileId(0)));
    }

    #[test]
    fn resolve_by_offset() {
        let symbols = SymbolMap::default();
        let text = "int x; void f() { char x; }";
        let unit = crate::parse::parse(&symbols, &Config::cpp(), &Memory::default(), "a.cc", Rc::from(text.as_bytes()), &mut ())
            .unwrap();
        let file = FileId(0);
        let outer = unit.resolve(file, 2, "x");
        let inner = unit.resolve(file, text.find("char").unwrap(), "x");
        assert_eq!(outer, unit.lookup("x"));
        assert_eq!(inner, unit.lookup("f::x"));
        assert_ne!(outer, inner);
    }
}
