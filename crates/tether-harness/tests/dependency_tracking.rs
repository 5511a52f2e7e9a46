#![forbid(unsafe_code)]

//! Integration tests: the subscribed set always matches the last read set.

use std::rc::Rc;

use proptest::prelude::*;
use tether_core::testing::{call_scope, conditional, scope_access};
use tether_core::{
    BindingFlags, BindingMode, Callable, ExpressionRef, ObjectRef, PropertyObserver, Scope, Value,
};
use tether_harness::Fixture;
use tether_runtime::{Bindable, Binding};

/// `join(a, flag ? b : c)`: reads `a`, `flag` and one of `b`/`c`.
fn branching_source() -> ExpressionRef {
    call_scope(
        "join",
        vec![
            scope_access("a"),
            conditional(scope_access("flag"), scope_access("b"), scope_access("c")),
        ],
    )
}

fn view_model(flag: bool) -> ObjectRef {
    let vm = ObjectRef::from_pairs([
        ("a", Value::from("a")),
        ("b", Value::from("b")),
        ("c", Value::from("c")),
        ("flag", Value::Bool(flag)),
    ]);
    vm.set(
        "join",
        Callable::new(|args| {
            let parts: Vec<&str> = args.iter().filter_map(Value::as_str).collect();
            Ok(Value::from(parts.join("+")))
        }),
    )
    .unwrap();
    vm
}

fn observes(binding: &Binding, vm: &ObjectRef, name: &str) -> bool {
    vm.existing_observer(name).is_some_and(|observer| {
        let observer: Rc<dyn PropertyObserver> = observer;
        binding.is_observing(&observer)
    })
}

fn subscribers(vm: &ObjectRef, name: &str) -> usize {
    vm.existing_observer(name)
        .map_or(0, |observer| observer.subscriber_count())
}

fn bound(fixture: &Fixture, vm: &ObjectRef, target: &ObjectRef) -> Rc<Binding> {
    let binding = fixture.binding(
        branching_source(),
        Value::from(target.clone()),
        "value",
        BindingMode::ToView,
    );
    binding.bind(&Scope::new(vm.clone()), BindingFlags::empty()).unwrap();
    fixture.flush().unwrap();
    binding
}

#[test]
fn switching_branches_swaps_the_dependency() {
    let fixture = Fixture::new();
    let vm = view_model(true);
    let target = ObjectRef::new();
    let binding = bound(&fixture, &vm, &target);

    assert_eq!(target.get("value"), Value::from("a+b"));
    assert!(observes(&binding, &vm, "a"));
    assert!(observes(&binding, &vm, "b"));
    assert!(!observes(&binding, &vm, "c"));
    assert_eq!(binding.observed_count(), 3);

    vm.set("flag", false).unwrap();
    assert_eq!(target.get("value"), Value::from("a+c"));
    assert!(observes(&binding, &vm, "a"));
    assert!(!observes(&binding, &vm, "b"));
    assert!(observes(&binding, &vm, "c"));
    assert_eq!(subscribers(&vm, "b"), 0);
    assert_eq!(subscribers(&vm, "c"), 1);

    vm.set("b", "ignored").unwrap();
    assert_eq!(target.get("value"), Value::from("a+c"));
}

#[test]
fn unbind_releases_every_dependency() {
    let fixture = Fixture::new();
    let vm = view_model(true);
    let target = ObjectRef::new();
    let binding = bound(&fixture, &vm, &target);
    binding.unbind().unwrap();

    assert_eq!(binding.observed_count(), 0);
    for name in ["a", "b", "c", "flag"] {
        assert_eq!(subscribers(&vm, name), 0, "{name} still subscribed");
    }
}

#[derive(Debug, Clone)]
enum Step {
    Flag(bool),
    Write(usize, u8),
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        any::<bool>().prop_map(Step::Flag),
        (0..3_usize, any::<u8>()).prop_map(|(slot, n)| Step::Write(slot, n)),
    ]
}

proptest! {
    #[test]
    fn subscriptions_track_the_last_evaluation(
        initial in any::<bool>(),
        steps in proptest::collection::vec(step(), 1..24),
    ) {
        let fixture = Fixture::new();
        let vm = view_model(initial);
        let target = ObjectRef::new();
        let binding = bound(&fixture, &vm, &target);

        let mut flag = initial;
        let mut values = [String::from("a"), String::from("b"), String::from("c")];
        for step in steps {
            match step {
                Step::Flag(next) => {
                    flag = next;
                    vm.set("flag", next).unwrap();
                }
                Step::Write(slot, n) => {
                    let name = ["a", "b", "c"][slot];
                    values[slot] = format!("{name}{n}");
                    vm.set(name, values[slot].as_str()).unwrap();
                }
            }
            fixture.flush().unwrap();

            let (taken, skipped) = if flag { ("b", "c") } else { ("c", "b") };
            prop_assert!(observes(&binding, &vm, "a"));
            prop_assert!(observes(&binding, &vm, "flag"));
            prop_assert!(observes(&binding, &vm, taken));
            prop_assert!(!observes(&binding, &vm, skipped));
            prop_assert_eq!(binding.observed_count(), 3);
            prop_assert_eq!(subscribers(&vm, skipped), 0);

            let branch = if flag { &values[1] } else { &values[2] };
            let expected = format!("{}+{}", values[0], branch);
            prop_assert_eq!(target.get("value"), Value::from(expected));
        }
    }
}
