use std::{fmt, ptr, slice, str};
use std::alloc::{Layout, handle_alloc_error};
use std::cell::RefCell;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use quickdry::Arena;

/// An arena to intern byte strings, with some value attached.
///
/// The value is fixed by the first call to [`SymbolMap::intern`] for a given key, which is how
/// keywords and alternative tokens get their kinds: they are interned before anything is lexed.
pub struct SymbolMap<T: Copy> {
    map: RefCell<HashMap<&'static [u8], ptr::NonNull<Entry<T>>>>,
    arena: Arena,
}

struct Entry<T> { value: T, key: &'static [u8] }

/// An interned byte string with address-based equality.
pub struct Symbol<'i, T> { entry: &'i Entry<T> }

impl<'i, T> Copy for Symbol<'i, T> {}
impl<'i, T> Clone for Symbol<'i, T> { fn clone(&self) -> Self { *self } }
impl<'i, T> PartialEq for Symbol<'i, T> {
    fn eq(&self, other: &Self) -> bool { ptr::eq(self.entry, other.entry) }
}
impl<'i, T> Eq for Symbol<'i, T> {}
impl<'i, T> Hash for Symbol<'i, T> {
    fn hash<H: Hasher>(&self, state: &mut H) { ptr::hash(self.entry, state) }
}

impl<T: Copy> Default for SymbolMap<T> {
    fn default() -> SymbolMap<T> {
        let map = RefCell::new(HashMap::default());
        let arena = Arena::default();
        SymbolMap { map, arena }
    }
}

impl<T: Copy> SymbolMap<T> {
    pub fn intern(&self, key: &[u8], value: T) -> Symbol<'_, T> {
        let mut map = self.map.borrow_mut();
        if let Some(&entry) = map.get(key) {
            return Symbol { entry: unsafe { entry.as_ref() } };
        }

        // Both the key bytes and the entry live in the arena, which outlives every `Symbol`
        // handed out by `&self`. Entries are never dropped, hence `T: Copy`.
        unsafe {
            let layout = Layout::from_size_align(key.len().max(1), 1).unwrap();
            let data = self.arena.alloc(layout);
            if data.is_null() { handle_alloc_error(layout); }
            ptr::copy_nonoverlapping(key.as_ptr(), data, key.len());
            let key: &'static [u8] = slice::from_raw_parts(data, key.len());

            let layout = Layout::new::<Entry<T>>();
            let data = self.arena.alloc(layout) as *mut Entry<T>;
            if data.is_null() { handle_alloc_error(layout); }
            ptr::write(data, Entry { value, key });

            let entry = ptr::NonNull::new_unchecked(data);
            map.insert(key, entry);
            Symbol { entry: entry.as_ref() }
        }
    }

    /// Look up a key without interning it.
    pub fn get(&self, key: &[u8]) -> Option<Symbol<'_, T>> {
        let map = self.map.borrow();
        map.get(key).map(|entry| Symbol { entry: unsafe { entry.as_ref() } })
    }

    pub fn len(&self) -> usize { self.map.borrow().len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

impl<'i, T> Symbol<'i, T> {
    pub fn key(self) -> &'i [u8] { self.entry.key }
    pub fn value(self) -> &'i T { &self.entry.value }

    /// The key as text. Keys that are not UTF-8 (only possible from malformed input) read as a
    /// replacement character.
    pub fn as_str(self) -> &'i str { str::from_utf8(self.entry.key).unwrap_or("\u{FFFD}") }
}

impl<'i, T: fmt::Debug> fmt::Debug for Symbol<'i, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={:?}", String::from_utf8_lossy(self.key()), self.value())
    }
}

impl<'i, T> fmt::Display for Symbol<'i, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(self.key()))
    }
}

#[cfg(test)]
mod tests {
    use super::SymbolMap;

    #[test]
    fn map() {
        let map = SymbolMap::default();

        let foo = map.intern(b"foo", 3);
        let bar = map.intern(b"bar", 5);
        let empty = map.intern(b"", 7);

        assert_eq!(foo.key(), b"foo");
        assert_eq!(*foo.value(), 3);
        assert_eq!(bar.as_str(), "bar");
        assert_eq!(*bar.value(), 5);
        assert_eq!(empty.key(), b"");
        assert_eq!(map.len(), 3);

        let new = map.intern(b"foo", 13);
        assert_eq!(new, foo);
        assert_eq!(*new.value(), 3);
        assert_ne!(foo, bar);

        assert_eq!(map.get(b"bar"), Some(bar));
        assert!(map.get(b"baz").is_none());
    }
}
