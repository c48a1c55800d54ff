//! Approximate memory footprint of a value and everything it reaches.
//!
//! Diagnostic only. The inline size of a value comes from `size_of_val`; heap
//! contents are found through [`TotalSize::heap_size`], which standard
//! containers implement and custom containers can implement to describe how
//! their contents are reached. Shared allocations (`Rc`, `Arc`) are counted
//! once, no matter how many handles point at them.

use std::any::type_name;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::mem::{size_of, size_of_val};
use std::rc::Rc;
use std::sync::Arc;

use serde_json::Value;
use tracing::trace;

/// Walk state: allocations already counted plus the verbose flag.
#[derive(Debug, Default)]
pub struct SizeContext {
    seen: HashSet<usize>,
    verbose: bool,
}

impl SizeContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log every visited value at `trace` level.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Inline plus heap size of `value`.
    pub fn total<T: TotalSize + ?Sized>(&mut self, value: &T) -> usize {
        let inline = size_of_val(value);
        let heap = value.heap_size(self);
        if self.verbose {
            trace!(inline, heap, ty = type_name::<T>(), "sized value");
        }
        inline + heap
    }

    /// Heap size of a value reached from a container, logged in verbose mode.
    ///
    /// Container impls call this for each element so every visited value
    /// shows up in the trace.
    pub fn child<T: TotalSize + ?Sized>(&mut self, value: &T) -> usize {
        let heap = value.heap_size(self);
        if self.verbose {
            trace!(inline = size_of_val(value), heap, ty = type_name::<T>(), "sized value");
        }
        heap
    }

    /// Returns false if the allocation at `ptr` was already counted.
    pub fn first_visit<T: ?Sized>(&mut self, ptr: *const T) -> bool {
        self.seen.insert(ptr.cast::<()>() as usize)
    }
}

/// Heap bytes reachable from a value, excluding its inline bytes.
///
/// The default reports nothing, which is right for plain data. Containers
/// return their buffer size plus the heap size of each element.
pub trait TotalSize {
    fn heap_size(&self, _ctx: &mut SizeContext) -> usize {
        0
    }
}

/// Approximate bytes used by `value` and everything reachable from it.
pub fn total_size_of<T: TotalSize + ?Sized>(value: &T) -> usize {
    SizeContext::new().total(value)
}

macro_rules! plain_data {
    ($($ty:ty),* $(,)?) => {
        $(impl TotalSize for $ty {})*
    };
}

plain_data!(
    (),
    bool,
    char,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    f32,
    f64
);

impl TotalSize for str {}

impl TotalSize for String {
    fn heap_size(&self, _ctx: &mut SizeContext) -> usize {
        self.capacity()
    }
}

impl<T: TotalSize> TotalSize for [T] {
    fn heap_size(&self, ctx: &mut SizeContext) -> usize {
        self.iter().map(|item| ctx.child(item)).sum()
    }
}

impl<T: TotalSize, const N: usize> TotalSize for [T; N] {
    fn heap_size(&self, ctx: &mut SizeContext) -> usize {
        self.as_slice().heap_size(ctx)
    }
}

impl<T: TotalSize> TotalSize for Vec<T> {
    fn heap_size(&self, ctx: &mut SizeContext) -> usize {
        self.capacity() * size_of::<T>() + self.as_slice().heap_size(ctx)
    }
}

impl<T: TotalSize> TotalSize for VecDeque<T> {
    fn heap_size(&self, ctx: &mut SizeContext) -> usize {
        let children: usize = self.iter().map(|item| ctx.child(item)).sum();
        self.capacity() * size_of::<T>() + children
    }
}

impl<T: TotalSize> TotalSize for Option<T> {
    fn heap_size(&self, ctx: &mut SizeContext) -> usize {
        self.as_ref().map_or(0, |inner| ctx.child(inner))
    }
}

impl<T: TotalSize + ?Sized> TotalSize for Box<T> {
    fn heap_size(&self, ctx: &mut SizeContext) -> usize {
        ctx.total(self.as_ref())
    }
}

impl<T: TotalSize + ?Sized> TotalSize for Rc<T> {
    fn heap_size(&self, ctx: &mut SizeContext) -> usize {
        if !ctx.first_visit(Rc::as_ptr(self)) {
            return 0;
        }
        // strong + weak counters live next to the value
        2 * size_of::<usize>() + ctx.total(self.as_ref())
    }
}

impl<T: TotalSize + ?Sized> TotalSize for Arc<T> {
    fn heap_size(&self, ctx: &mut SizeContext) -> usize {
        if !ctx.first_visit(Arc::as_ptr(self)) {
            return 0;
        }
        2 * size_of::<usize>() + ctx.total(self.as_ref())
    }
}

impl<K: TotalSize, V: TotalSize, S> TotalSize for HashMap<K, V, S> {
    fn heap_size(&self, ctx: &mut SizeContext) -> usize {
        let children: usize = self
            .iter()
            .map(|(key, value)| ctx.child(key) + ctx.child(value))
            .sum();
        self.capacity() * (size_of::<K>() + size_of::<V>()) + children
    }
}

impl<T: TotalSize, S> TotalSize for HashSet<T, S> {
    fn heap_size(&self, ctx: &mut SizeContext) -> usize {
        let children: usize = self.iter().map(|item| ctx.child(item)).sum();
        self.capacity() * size_of::<T>() + children
    }
}

impl<K: TotalSize, V: TotalSize> TotalSize for BTreeMap<K, V> {
    fn heap_size(&self, ctx: &mut SizeContext) -> usize {
        self.iter()
            .map(|(key, value)| {
                size_of::<K>() + size_of::<V>() + ctx.child(key) + ctx.child(value)
            })
            .sum()
    }
}

impl<T: TotalSize> TotalSize for BTreeSet<T> {
    fn heap_size(&self, ctx: &mut SizeContext) -> usize {
        self.iter()
            .map(|item| size_of::<T>() + ctx.child(item))
            .sum()
    }
}

impl<A: TotalSize, B: TotalSize> TotalSize for (A, B) {
    fn heap_size(&self, ctx: &mut SizeContext) -> usize {
        ctx.child(&self.0) + ctx.child(&self.1)
    }
}

impl<A: TotalSize, B: TotalSize, C: TotalSize> TotalSize for (A, B, C) {
    fn heap_size(&self, ctx: &mut SizeContext) -> usize {
        ctx.child(&self.0) + ctx.child(&self.1) + ctx.child(&self.2)
    }
}

impl TotalSize for Value {
    fn heap_size(&self, ctx: &mut SizeContext) -> usize {
        match self {
            Value::Null | Value::Bool(_) | Value::Number(_) => 0,
            Value::String(text) => ctx.child(text),
            Value::Array(items) => items.heap_size(ctx),
            Value::Object(map) => map
                .iter()
                .map(|(key, value)| {
                    size_of::<String>() + size_of::<Value>() + ctx.child(key) + ctx.child(value)
                })
                .sum(),
        }
    }
}
