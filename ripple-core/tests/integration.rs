//! Integration Tests for the Reactive Graph
//!
//! These tests verify that sources, derived values and effects work together
//! correctly through the public API.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use ripple_core::{Derived, Error, RefreshPolicy, Runtime};

/// Test that a derived value tracks source dependencies.
#[test]
fn derived_tracks_source_dependency() {
    let rt = Runtime::new();
    let source = rt.create_source(10);
    let derived = rt.create_derived(move |rt| Ok(rt.read(source)? * 2));

    // First access computes the value
    assert_eq!(derived.get(&rt).unwrap(), 20);

    // No manual invalidation needed
    source.set(&rt, 5).unwrap();
    assert_eq!(derived.get(&rt).unwrap(), 10);
}

/// Test that an effect tracks source dependencies.
#[test]
fn effect_tracks_source_dependency() {
    let rt = Runtime::new();
    let source = rt.create_source(0);
    let observed = Rc::new(Cell::new(-1));
    let sink = observed.clone();

    rt.create_effect(move |rt| {
        sink.set(rt.read(source)?);
        Ok(())
    })
    .unwrap();

    // Effect runs on creation, captures initial value
    assert_eq!(observed.get(), 0);

    let root = rt.create_unit(None, RefreshPolicy::OnDemand).unwrap();
    source.set(&rt, 42).unwrap();
    assert_eq!(observed.get(), 0);

    // The next pass flushes the queued rerun
    let report = rt.tick(root).unwrap();
    assert_eq!(report.effects_run, 1);
    assert_eq!(observed.get(), 42);
}

/// Test that derived values cache correctly.
#[test]
fn derived_caches_expensive_computation() {
    let rt = Runtime::new();
    let runs = Rc::new(Cell::new(0));
    let counter = runs.clone();
    let derived = rt.create_derived(move |_| {
        counter.set(counter.get() + 1);
        Ok(42)
    });

    for _ in 0..4 {
        assert_eq!(derived.get(&rt).unwrap(), 42);
    }
    assert_eq!(runs.get(), 1);
    assert_eq!(rt.stats().recomputations, 1);
}

/// Test that derived values can depend on other derived values.
#[test]
fn derived_depends_on_derived() {
    let rt = Runtime::new();
    let base = rt.create_source(5);
    let doubled = rt.create_derived(move |rt| Ok(rt.read(base)? * 2));
    let plus_ten = rt.create_derived(move |rt| Ok(rt.read(doubled)? + 10));

    assert_eq!(doubled.get(&rt).unwrap(), 10);
    assert_eq!(plus_ten.get(&rt).unwrap(), 20);

    base.set(&rt, 10).unwrap();
    assert!(rt.is_dirty(plus_ten).unwrap());
    assert_eq!(plus_ten.get(&rt).unwrap(), 30);
    assert_eq!(doubled.get(&rt).unwrap(), 20);
}

/// Diamond: a -> (b, c) -> d. The reader of d never sees b and c disagree.
#[test]
fn diamond_is_glitch_free() {
    let rt = Runtime::new();
    let a = rt.create_source(1);
    let b = rt.create_derived(move |rt| Ok(rt.read(a)? + 1));
    let c = rt.create_derived(move |rt| Ok(rt.read(a)? * 2));
    let d = rt.create_derived(move |rt| Ok((rt.read(b)?, rt.read(c)?)));

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    rt.create_effect(move |rt| {
        sink.borrow_mut().push(rt.read(d)?);
        Ok(())
    })
    .unwrap();

    let root = rt.create_unit(None, RefreshPolicy::OnDemand).unwrap();
    for value in [2, 3, 10] {
        a.set(&rt, value).unwrap();
        rt.tick(root).unwrap();
    }

    let seen = seen.borrow();
    assert_eq!(*seen, vec![(2, 2), (3, 4), (4, 6), (11, 20)]);
    for (b, c) in seen.iter() {
        assert_eq!(*c, (*b - 1) * 2);
    }
}

/// One write followed by one read recomputes each node of a diamond once,
/// and the join sees both updated sides in that single run.
#[test]
fn diamond_recomputes_each_node_once() {
    let rt = Runtime::new();
    let runs = Rc::new(RefCell::new([0usize; 3]));
    let a = rt.create_source(1);
    let (rb, rc, rd) = (runs.clone(), runs.clone(), runs.clone());
    let b = rt.create_derived(move |rt| {
        rb.borrow_mut()[0] += 1;
        Ok(rt.read(a)? + 1)
    });
    let c = rt.create_derived(move |rt| {
        rc.borrow_mut()[1] += 1;
        Ok(rt.read(a)? * 2)
    });
    let d = rt.create_derived(move |rt| {
        rd.borrow_mut()[2] += 1;
        Ok((rt.read(b)?, rt.read(c)?))
    });
    assert_eq!(d.get(&rt).unwrap(), (2, 2));
    assert_eq!(*runs.borrow(), [1, 1, 1]);

    let before = rt.stats().recomputations;
    a.set(&rt, 5).unwrap();
    assert_eq!(d.get(&rt).unwrap(), (6, 10));
    assert_eq!(*runs.borrow(), [2, 2, 2]);
    assert_eq!(rt.stats().recomputations, before + 3);

    // Nothing changed since, so further reads are served from cache.
    assert_eq!(d.get(&rt).unwrap(), (6, 10));
    assert_eq!(*runs.borrow(), [2, 2, 2]);
}

/// A long chain that was read once refreshes after a write without nesting
/// one frame per link.
#[test]
fn long_chain_refreshes_iteratively() {
    const LEN: i64 = 5_000;
    let rt = Runtime::new();
    let head = rt.create_source(0i64);
    let mut tail: Derived<i64> = rt.create_derived(move |rt| rt.read(head));
    tail.get(&rt).unwrap();
    for _ in 1..LEN {
        let previous = tail;
        tail = rt.create_derived(move |rt| Ok(rt.read(previous)? + 1));
        // Built and read link by link, so the first evaluation stays shallow.
        tail.get(&rt).unwrap();
    }
    assert_eq!(tail.get(&rt).unwrap(), LEN - 1);

    let before = rt.stats().recomputations;
    head.set(&rt, 10).unwrap();
    assert_eq!(tail.get(&rt).unwrap(), LEN + 9);
    assert_eq!(rt.stats().recomputations, before + LEN as u64);
}

/// A write that the equality predicate rejects does no work downstream.
#[test]
fn equal_write_is_a_no_op() {
    let rt = Runtime::new();
    let source = rt.create_source(7);
    let derived = rt.create_derived(move |rt| rt.read(source));
    derived.get(&rt).unwrap();

    let requests = rt.trigger_handle().stats().requests;
    let before = rt.stats();
    source.set(&rt, 7).unwrap();

    assert_eq!(rt.stats(), before);
    assert!(!rt.is_dirty(derived).unwrap());
    assert_eq!(rt.version(source).unwrap(), 0);
    assert_eq!(rt.trigger_handle().stats().requests, requests);
}

/// A derived value whose result does not change stops propagation there.
#[test]
fn unchanged_derived_shields_downstream() {
    let rt = Runtime::new();
    let source = rt.create_source(2);
    let is_even = rt.create_derived(move |rt| Ok(rt.read(source)? % 2 == 0));
    let effect_runs = Rc::new(Cell::new(0));
    let counter = effect_runs.clone();
    rt.create_effect(move |rt| {
        rt.read(is_even)?;
        counter.set(counter.get() + 1);
        Ok(())
    })
    .unwrap();

    let root = rt.create_unit(None, RefreshPolicy::OnDemand).unwrap();
    source.set(&rt, 4).unwrap();
    let report = rt.tick(root).unwrap();

    assert_eq!(report.effects_run, 0);
    assert_eq!(effect_runs.get(), 1);
    assert_eq!(rt.stats().recomputations, 2);
}

/// Dependencies are rebuilt on every run, so a branch not taken stops
/// subscribing.
#[test]
fn dynamic_dependencies_are_rebuilt() {
    let rt = Runtime::new();
    let use_left = rt.create_source(true);
    let left = rt.create_source(1);
    let right = rt.create_source(100);
    let picked = rt.create_derived(move |rt| {
        if rt.read(use_left)? {
            rt.read(left)
        } else {
            rt.read(right)
        }
    });

    assert_eq!(picked.get(&rt).unwrap(), 1);
    right.set(&rt, 200).unwrap();
    assert!(!rt.is_dirty(picked).unwrap());

    use_left.set(&rt, false).unwrap();
    assert_eq!(picked.get(&rt).unwrap(), 200);
    left.set(&rt, 2).unwrap();
    assert!(!rt.is_dirty(picked).unwrap());
}

/// Test effect disposal stops execution.
#[test]
fn disposed_effect_does_not_run() {
    let rt = Runtime::new();
    let source = rt.create_source(0);
    let runs = Rc::new(Cell::new(0));
    let counter = runs.clone();
    let effect = rt
        .create_effect(move |rt| {
            rt.read(source)?;
            counter.set(counter.get() + 1);
            Ok(())
        })
        .unwrap();

    // Ran once on creation
    assert_eq!(runs.get(), 1);
    effect.dispose(&rt).unwrap();

    let root = rt.create_unit(None, RefreshPolicy::OnDemand).unwrap();
    for value in 1..4 {
        source.set(&rt, value).unwrap();
        rt.tick(root).unwrap();
    }
    assert_eq!(runs.get(), 1);
    assert!(matches!(
        rt.is_dirty(effect).unwrap_err(),
        Error::DestroyedNodeAccess(_)
    ));
}

/// Destroying a producer unlinks it without dirtying its consumers; a clean
/// consumer keeps serving its cache.
#[test]
fn destroying_producer_keeps_consumer_cache() {
    let rt = Runtime::new();
    let source = rt.create_source(3);
    let derived = rt.create_derived(move |rt| rt.read(source));
    assert_eq!(derived.get(&rt).unwrap(), 3);

    rt.destroy(source).unwrap();
    assert!(!rt.is_dirty(derived).unwrap());
    assert_eq!(derived.get(&rt).unwrap(), 3);
}

/// Mutual recursion through two derived values is reported, not looped.
#[test]
fn indirect_cycle_is_detected() {
    let rt = Runtime::new();
    let slot: Rc<Cell<Option<Derived<i32>>>> = Rc::new(Cell::new(None));
    let late = slot.clone();
    let a = rt.create_derived(move |rt| match late.get() {
        Some(b) => rt.read(b),
        None => Ok(0),
    });
    let b = rt.create_derived(move |rt| rt.read(a));
    slot.set(Some(b));

    assert!(matches!(
        rt.read(a).unwrap_err(),
        Error::CyclicDependency { .. }
    ));
}
