//! Mark-sweep garbage collector.
//!
//! Collection only ever happens when somebody asks for it, between two instructions.
//! The roots are the operand stack and the global memory. The call stack only holds
//! code addresses and is never scanned.

use crate::vm::{visit_children, Heap, ObjectRef, Program, Value};
use tracing::{debug, trace, Level};

/// every object reference held by the operand stack or global memory
pub fn roots(program: &Program) -> Vec<ObjectRef> {
    program
        .stack()
        .iter()
        .chain(program.memory().iter())
        .filter_map(Value::as_object)
        .collect()
}

/// Marks everything reachable from `roots` and frees the rest.
/// Returns the number of objects freed by this cycle.
///
/// Marking uses an explicit worklist instead of recursion, so the depth of the
/// object graph does not matter.
pub fn collect(heap: &mut Heap, roots: impl IntoIterator<Item = ObjectRef>) -> usize {
    let mut worklist: Vec<ObjectRef> = roots.into_iter().collect();
    let root_count = worklist.len();
    let mut marked = 0;

    while let Some(r) = worklist.pop() {
        debug_assert!(heap.contains(r), "collector reached dangling reference {}", r);
        if !heap.mark(r) {
            continue;
        }
        marked += 1;
        if let Some(object) = heap.get(r) {
            visit_children(object, |child| worklist.push(child));
        }
    }

    trace_heap(heap, "marked");
    let freed = heap.sweep();
    trace_heap(heap, "swept");
    debug!(
        roots = root_count,
        marked,
        freed,
        live = heap.len(),
        "collection finished"
    );
    freed
}

/// one trace event per live object, with its mark bit
fn trace_heap(heap: &Heap, phase: &'static str) {
    if !tracing::enabled!(Level::TRACE) {
        return;
    }
    for (r, _) in heap.iter() {
        trace!(
            phase,
            object = %r,
            marked = heap.is_marked(r),
            value = %heap.describe(r.into()),
            "heap dump"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::{Closure, Object, Pair};

    fn pair(program: &mut Program, left: Value, right: Value) -> ObjectRef {
        program
            .heap_mut()
            .make_pair(left, right)
            .as_object()
            .unwrap()
    }

    #[test]
    fn stack_entry_keeps_object_alive_until_popped() {
        let mut p = Program::new(vec![]);
        let a = pair(&mut p, Value::Nil, Value::Nil);
        p.push(a.into()).unwrap();

        assert_eq!(p.collect_garbage(), 0);
        assert!(p.heap().contains(a));

        p.pop().unwrap();
        assert_eq!(p.collect_garbage(), 1);
        assert!(!p.heap().contains(a));
    }

    #[test]
    fn transitive_reachability() {
        let mut p = Program::new(vec![]);
        let a = pair(&mut p, Value::Nil, Value::Nil);
        let b = pair(&mut p, a.into(), Value::Nil);
        p.push(b.into()).unwrap();

        assert_eq!(p.collect_garbage(), 0);
        p.pop().unwrap();
        assert_eq!(p.collect_garbage(), 2);
        assert!(p.heap().is_empty());
    }

    #[test]
    fn unreachable_cycle_is_freed() {
        let mut p = Program::new(vec![]);
        let a = pair(&mut p, Value::Nil, Value::Nil);
        let b = pair(&mut p, a.into(), Value::Nil);
        if let Some(Object::Pair(a_pair)) = p.heap_mut().get_mut(a) {
            a_pair.right = b.into();
        }

        p.push(a.into()).unwrap();
        assert_eq!(p.collect_garbage(), 0);

        let freed_before = p.heap().stats().freed;
        p.pop().unwrap();
        assert_eq!(p.collect_garbage(), 2);
        assert_eq!(p.heap().stats().freed - freed_before, 2);
    }

    #[test]
    fn second_collection_frees_nothing() {
        let mut p = Program::new(vec![]);
        let kept = pair(&mut p, Value::Nil, Value::Nil);
        pair(&mut p, Value::Nil, Value::Nil);
        p.push(kept.into()).unwrap();

        assert_eq!(p.collect_garbage(), 1);
        assert_eq!(p.collect_garbage(), 0);
    }

    #[test]
    fn global_memory_is_a_root() {
        let mut p = Program::new(vec![]);
        let x = p.heap_mut().make_int(5);
        p.set_global(200, x).unwrap();

        assert_eq!(p.collect_garbage(), 0);
        p.set_global(200, Value::Nil).unwrap();
        assert_eq!(p.collect_garbage(), 1);
    }

    #[test]
    fn closures_are_traced() {
        let mut p = Program::new(vec![]);
        let function = p.heap_mut().make_function().as_object().unwrap();
        let captured = p.heap_mut().make_int(3);
        let env = pair(&mut p, captured, Value::Nil);
        let closure = p.heap_mut().make_closure(function, env);
        p.push(closure).unwrap();

        assert_eq!(p.collect_garbage(), 0);
        assert_eq!(p.heap().len(), 4);
        assert!(matches!(
            p.heap().get(closure.as_object().unwrap()),
            Some(Object::Closure(Closure { .. }))
        ));

        p.pop().unwrap();
        assert_eq!(p.collect_garbage(), 4);
    }

    #[test]
    fn mark_bits_are_cleared_after_collection() {
        let mut p = Program::new(vec![]);
        let a = pair(&mut p, Value::Nil, Value::Nil);
        p.push(a.into()).unwrap();
        p.collect_garbage();
        assert!(p.heap().iter().all(|(r, _)| !p.heap().is_marked(r)));
    }

    #[test]
    fn deep_chains_do_not_recurse() {
        let mut heap = Heap::new();
        let mut head = Value::Nil;
        for _ in 0..200_000 {
            head = heap.make_pair(Value::Nil, head);
        }
        assert_eq!(collect(&mut heap, head.as_object()), 0);
        assert_eq!(collect(&mut heap, None), 200_000);
    }

    #[test]
    fn roots_skip_nil_and_call_stack() {
        let mut p = Program::new(vec![]);
        let x = p.heap_mut().make_int(1);
        p.push(Value::Nil).unwrap();
        p.push(x).unwrap();
        p.set_global(0, x).unwrap();
        assert_eq!(roots(&p), vec![x.as_object().unwrap(); 2]);
    }

    #[test]
    fn pairs_built_by_bytecode_are_collected() {
        use crate::opcode::{encode, OpCode};
        let mut p = Program::new(encode(&[
            OpCode::Push(1),
            OpCode::Push(2),
            OpCode::Pair,
            OpCode::Pop,
            OpCode::Halt,
        ]));
        p.run().unwrap();
        assert_eq!(p.heap().len(), 3);
        assert_eq!(p.collect_garbage(), 3);
    }

    #[test]
    fn heap_dumps_do_not_change_the_outcome() {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(Level::TRACE)
            .with_test_writer()
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let mut p = Program::new(vec![]);
        let kept = pair(&mut p, Value::Nil, Value::Nil);
        let inner = p.heap_mut().make_int(1);
        pair(&mut p, inner, Value::Nil);
        p.push(kept.into()).unwrap();

        assert_eq!(p.collect_garbage(), 2);
        assert_eq!(p.heap().len(), 1);
        assert!(!p.heap().is_marked(kept));
    }

    #[test]
    fn pair_fields_are_shared_not_copied() {
        let mut p = Program::new(vec![]);
        let x = p.heap_mut().make_int(1);
        let outer = pair(&mut p, x, x);
        p.push(outer.into()).unwrap();
        assert_eq!(p.collect_garbage(), 0);
        assert_eq!(p.heap().len(), 2);
        assert_eq!(
            p.heap().get(outer),
            Some(&Object::Pair(Pair { left: x, right: x }))
        );
    }
}
