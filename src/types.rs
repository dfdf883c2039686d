use indexmap::{IndexMap, IndexSet};

use crate::scope::DeclId;

/// A handle to an interned [`Type`]. Structurally equal types have equal handles.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct TypeId(pub u32);

impl TypeId {
    pub const UNKNOWN: TypeId = TypeId(0);
    pub const DEPENDENT: TypeId = TypeId(1);
    pub const VOID: TypeId = TypeId(2);
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub enum Builtin {
    Bool, Char, SignedChar, UnsignedChar, WcharT, Char16, Char32,
    Short, UnsignedShort, Int, UnsignedInt, Long, UnsignedLong, LongLong, UnsignedLongLong,
    Float, Double, LongDouble,
    Nullptr,
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
pub struct Cv { pub const_: bool, pub volatile: bool }

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Type {
    /// Not determined, e.g. the type of an undeclared name.
    Unknown,
    /// Depends on template parameters in a way that is not tracked structurally.
    Dependent,
    Void,
    Builtin(Builtin),
    Qualified(Cv, TypeId),
    Pointer(TypeId),
    LValueRef(TypeId),
    RValueRef(TypeId),
    Array(TypeId, Option<u64>),
    Function { ret: TypeId, params: Vec<TypeId>, variadic: bool },
    /// A class, struct or union, by its canonical declaration. Instantiations are classes too.
    Class(DeclId),
    Enum(DeclId),
    /// A template type parameter.
    Param(DeclId),
    /// A template-id that has not been materialized, either because its arguments are dependent
    /// or because the template was still being defined when it was named.
    Specialization(DeclId, Vec<Arg>),
}

/// A template argument.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Arg {
    Type(TypeId),
    Value(i64),
    /// A non-type template parameter.
    Param(DeclId),
    Unknown,
}

/// Values assigned to template parameters, in parameter order.
pub type Bindings = IndexMap<DeclId, Arg>;

/// The type interner.
pub struct Types { set: IndexSet<Type> }

impl Default for Types {
    fn default() -> Types {
        let mut set = IndexSet::default();
        set.insert(Type::Unknown);
        set.insert(Type::Dependent);
        set.insert(Type::Void);
        Types { set }
    }
}

impl Builtin {
    pub fn is_integral(self) -> bool {
        !matches!(self, Builtin::Float | Builtin::Double | Builtin::LongDouble | Builtin::Nullptr)
    }

    pub fn is_floating(self) -> bool {
        matches!(self, Builtin::Float | Builtin::Double | Builtin::LongDouble)
    }

    pub fn is_arithmetic(self) -> bool { self != Builtin::Nullptr }

    /// The type this one is promoted to, if integral or floating point promotion applies.
    pub fn promotion(self) -> Option<Builtin> {
        match self {
            Builtin::Bool | Builtin::Char | Builtin::SignedChar | Builtin::UnsignedChar |
            Builtin::WcharT | Builtin::Char16 | Builtin::Char32 |
            Builtin::Short | Builtin::UnsignedShort => { Some(Builtin::Int) }
            Builtin::Float => { Some(Builtin::Double) }
            _ => { None }
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Bool => { "bool" }
            Builtin::Char => { "char" }
            Builtin::SignedChar => { "signed char" }
            Builtin::UnsignedChar => { "unsigned char" }
            Builtin::WcharT => { "wchar_t" }
            Builtin::Char16 => { "char16_t" }
            Builtin::Char32 => { "char32_t" }
            Builtin::Short => { "short" }
            Builtin::UnsignedShort => { "unsigned short" }
            Builtin::Int => { "int" }
            Builtin::UnsignedInt => { "unsigned int" }
            Builtin::Long => { "long" }
            Builtin::UnsignedLong => { "unsigned long" }
            Builtin::LongLong => { "long long" }
            Builtin::UnsignedLongLong => { "unsigned long long" }
            Builtin::Float => { "float" }
            Builtin::Double => { "double" }
            Builtin::LongDouble => { "long double" }
            Builtin::Nullptr => { "std::nullptr_t" }
        }
    }
}

impl Types {
    pub fn intern(&mut self, ty: Type) -> TypeId {
        let (index, _) = self.set.insert_full(ty);
        TypeId(index as u32)
    }

    pub fn get(&self, id: TypeId) -> &Type { &self.set[id.0 as usize] }

    pub fn len(&self) -> usize { self.set.len() }

    pub fn is_empty(&self) -> bool { self.set.is_empty() }

    pub fn builtin(&mut self, builtin: Builtin) -> TypeId { self.intern(Type::Builtin(builtin)) }

    pub fn pointer(&mut self, ty: TypeId) -> TypeId {
        match *self.get(ty) {
            Type::Unknown | Type::Dependent => { ty }
            _ => { self.intern(Type::Pointer(ty)) }
        }
    }

    /// An lvalue reference, collapsing references to references.
    pub fn lvalue_ref(&mut self, ty: TypeId) -> TypeId {
        match *self.get(ty) {
            Type::Unknown | Type::Dependent => { ty }
            Type::LValueRef(_) => { ty }
            Type::RValueRef(inner) => { self.intern(Type::LValueRef(inner)) }
            _ => { self.intern(Type::LValueRef(ty)) }
        }
    }

    pub fn rvalue_ref(&mut self, ty: TypeId) -> TypeId {
        match *self.get(ty) {
            Type::Unknown | Type::Dependent | Type::LValueRef(_) | Type::RValueRef(_) => { ty }
            _ => { self.intern(Type::RValueRef(ty)) }
        }
    }

    pub fn qualified(&mut self, cv: Cv, ty: TypeId) -> TypeId {
        if cv == Cv::default() { return ty; }
        match *self.get(ty) {
            Type::Unknown | Type::Dependent | Type::LValueRef(_) | Type::RValueRef(_) => { ty }
            Type::Qualified(inner_cv, inner) => {
                let cv = Cv { const_: cv.const_ | inner_cv.const_, volatile: cv.volatile | inner_cv.volatile };
                self.intern(Type::Qualified(cv, inner))
            }
            _ => { self.intern(Type::Qualified(cv, ty)) }
        }
    }

    pub fn array(&mut self, ty: TypeId, len: Option<u64>) -> TypeId {
        match *self.get(ty) {
            Type::Unknown | Type::Dependent => { ty }
            _ => { self.intern(Type::Array(ty, len)) }
        }
    }

    pub fn function(&mut self, ret: TypeId, params: Vec<TypeId>, variadic: bool) -> TypeId {
        self.intern(Type::Function { ret, params, variadic })
    }

    pub fn strip_references(&self, ty: TypeId) -> TypeId {
        match *self.get(ty) {
            Type::LValueRef(inner) | Type::RValueRef(inner) => { inner }
            _ => { ty }
        }
    }

    /// Split off top-level cv-qualifiers.
    pub fn unqualified(&self, ty: TypeId) -> (Cv, TypeId) {
        match *self.get(ty) {
            Type::Qualified(cv, inner) => { (cv, inner) }
            _ => { (Cv::default(), ty) }
        }
    }

    /// The type a by-value parameter sees for an argument of type `ty`: references and top-level
    /// qualifiers removed, arrays and functions decayed to pointers.
    pub fn decay(&mut self, ty: TypeId) -> TypeId {
        let ty = self.strip_references(ty);
        let (_, ty) = self.unqualified(ty);
        match *self.get(ty) {
            Type::Array(element, _) => { self.pointer(element) }
            Type::Function { .. } => { self.pointer(ty) }
            _ => { ty }
        }
    }

    /// The return type of a function type, looking through pointers to functions.
    pub fn return_type(&self, ty: TypeId) -> Option<TypeId> {
        match *self.get(self.strip_references(ty)) {
            Type::Function { ret, .. } => { Some(ret) }
            Type::Pointer(inner) => match *self.get(inner) {
                Type::Function { ret, .. } => { Some(ret) }
                _ => { None }
            }
            _ => { None }
        }
    }

    pub fn is_dependent(&self, ty: TypeId) -> bool {
        match *self.get(ty) {
            Type::Dependent | Type::Param(_) => { true }
            Type::Unknown | Type::Void | Type::Builtin(_) | Type::Class(_) | Type::Enum(_) => { false }
            Type::Qualified(_, inner) | Type::Pointer(inner) | Type::LValueRef(inner) |
            Type::RValueRef(inner) | Type::Array(inner, _) => { self.is_dependent(inner) }
            Type::Function { ret, ref params, .. } => {
                self.is_dependent(ret) || params.iter().any(|&param| self.is_dependent(param))
            }
            Type::Specialization(_, ref args) => { args.iter().any(|arg| self.is_dependent_arg(arg)) }
        }
    }

    pub fn is_dependent_arg(&self, arg: &Arg) -> bool {
        match *arg {
            Arg::Type(ty) => { self.is_dependent(ty) }
            Arg::Param(_) => { true }
            Arg::Value(_) | Arg::Unknown => { false }
        }
    }

    /// Whether a specialization inside `ty` is still waiting to be materialized.
    pub fn is_deferred(&self, ty: TypeId) -> bool {
        match *self.get(ty) {
            Type::Specialization(..) => { true }
            Type::Qualified(_, inner) | Type::Pointer(inner) | Type::LValueRef(inner) |
            Type::RValueRef(inner) | Type::Array(inner, _) => { self.is_deferred(inner) }
            _ => { false }
        }
    }

    /// Whether the type is fully determined: not unknown and not dependent.
    pub fn is_known(&self, ty: TypeId) -> bool {
        ty != TypeId::UNKNOWN && !self.is_dependent(ty)
    }

    /// Replace template parameters by their bound arguments. Unbound parameters are left alone.
    pub fn substitute(&mut self, ty: TypeId, bindings: &Bindings) -> TypeId {
        if bindings.is_empty() { return ty; }
        match self.get(ty).clone() {
            Type::Param(param) => match bindings.get(&param) {
                Some(&Arg::Type(arg)) => { arg }
                Some(_) => { TypeId::UNKNOWN }
                None => { ty }
            }
            Type::Unknown | Type::Dependent | Type::Void | Type::Builtin(_) |
            Type::Class(_) | Type::Enum(_) => { ty }
            Type::Qualified(cv, inner) => {
                let inner = self.substitute(inner, bindings);
                self.qualified(cv, inner)
            }
            Type::Pointer(inner) => {
                let inner = self.substitute(inner, bindings);
                self.pointer(inner)
            }
            Type::LValueRef(inner) => {
                let inner = self.substitute(inner, bindings);
                self.lvalue_ref(inner)
            }
            Type::RValueRef(inner) => {
                let inner = self.substitute(inner, bindings);
                self.rvalue_ref(inner)
            }
            Type::Array(inner, len) => {
                let inner = self.substitute(inner, bindings);
                self.array(inner, len)
            }
            Type::Function { ret, params, variadic } => {
                let ret = self.substitute(ret, bindings);
                let params = params.into_iter().map(|param| self.substitute(param, bindings)).collect();
                self.function(ret, params, variadic)
            }
            Type::Specialization(template, args) => {
                let args = args.iter().map(|arg| self.substitute_arg(arg, bindings)).collect();
                self.intern(Type::Specialization(template, args))
            }
        }
    }

    pub fn substitute_arg(&mut self, arg: &Arg, bindings: &Bindings) -> Arg {
        match *arg {
            Arg::Type(ty) => { Arg::Type(self.substitute(ty, bindings)) }
            Arg::Param(param) => { bindings.get(&param).cloned().unwrap_or(Arg::Param(param)) }
            Arg::Value(_) | Arg::Unknown => { arg.clone() }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Arg, Bindings, Builtin, Cv, Type, TypeId, Types};
    use crate::scope::DeclId;

    #[test]
    fn interning() {
        let mut types = Types::default();
        let int = types.builtin(Builtin::Int);
        let a = types.pointer(int);
        let b = types.intern(Type::Pointer(int));
        assert_eq!(a, b);
        assert_eq!(types.get(TypeId::VOID), &Type::Void);
        assert_eq!(types.pointer(TypeId::UNKNOWN), TypeId::UNKNOWN);

        let konst = Cv { const_: true, volatile: false };
        let c = types.qualified(konst, int);
        assert_eq!(types.qualified(konst, c), c);
        assert_eq!(types.unqualified(c), (konst, int));
    }

    #[test]
    fn references_collapse() {
        let mut types = Types::default();
        let int = types.builtin(Builtin::Int);
        let lref = types.lvalue_ref(int);
        let rref = types.rvalue_ref(int);
        assert_eq!(types.lvalue_ref(rref), lref);
        assert_eq!(types.rvalue_ref(lref), lref);
        assert_eq!(types.strip_references(rref), int);
    }

    #[test]
    fn decay() {
        let mut types = Types::default();
        let char_ = types.builtin(Builtin::Char);
        let array = types.array(char_, Some(4));
        let pointer = types.pointer(char_);
        assert_eq!(types.decay(array), pointer);

        let function = types.function(char_, vec![], false);
        let reference = types.lvalue_ref(function);
        let decayed = types.decay(reference);
        assert_eq!(types.get(decayed), &Type::Pointer(function));
        assert_eq!(types.return_type(decayed), Some(char_));
    }

    #[test]
    fn substitution() {
        let mut types = Types::default();
        let t = DeclId(7);
        let n = DeclId(8);
        let param = types.intern(Type::Param(t));
        let pointer = types.pointer(param);
        let spec = types.intern(Type::Specialization(DeclId(1), vec![Arg::Type(pointer), Arg::Param(n)]));
        assert!(types.is_dependent(spec));

        let int = types.builtin(Builtin::Int);
        let mut bindings = Bindings::default();
        bindings.insert(t, Arg::Type(int));
        bindings.insert(n, Arg::Value(3));

        let int_pointer = types.pointer(int);
        assert_eq!(types.substitute(pointer, &bindings), int_pointer);
        let concrete = types.substitute(spec, &bindings);
        assert_eq!(types.get(concrete), &Type::Specialization(DeclId(1), vec![Arg::Type(int_pointer), Arg::Value(3)]));
        assert!(!types.is_dependent(concrete));
        assert!(types.is_known(concrete));
        assert!(!types.is_known(TypeId::UNKNOWN));
    }

    #[test]
    fn promotions() {
        assert_eq!(Builtin::Char.promotion(), Some(Builtin::Int));
        assert_eq!(Builtin::Float.promotion(), Some(Builtin::Double));
        assert_eq!(Builtin::Long.promotion(), None);
        assert!(Builtin::Bool.is_integral());
        assert!(!Builtin::Nullptr.is_arithmetic());
    }
}
