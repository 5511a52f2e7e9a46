#![forbid(unsafe_code)]

//! Integration tests: polled properties on a manual clock.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use tether_core::testing::{path, scope_access};
use tether_core::{BindingFlags, BindingMode, ObjectRef, Scope, Value};
use tether_dom::Node;
use tether_harness::Fixture;
use tether_runtime::{Bindable, RuntimeConfig};

const INTERVAL: Duration = Duration::from_millis(120);

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

#[test]
fn opaque_source_is_polled_every_interval() {
    let fixture = Fixture::new();
    let vm = ObjectRef::opaque();
    vm.set("x", 1).unwrap();
    let target = ObjectRef::new();
    let binding = fixture.binding(scope_access("x"), Value::from(target.clone()), "value", BindingMode::ToView);
    binding.bind(&Scope::new(vm.clone()), BindingFlags::empty()).unwrap();
    fixture.flush().unwrap();

    let checker = fixture.dirty_checker().unwrap();
    assert_eq!(checker.tracked_count(), 1);
    assert!(checker.is_scheduled());

    vm.set("x", 2).unwrap();
    fixture.advance(INTERVAL - ms(1)).unwrap();
    assert_eq!(target.get("value"), Value::from(1));
    fixture.advance(ms(1)).unwrap();
    assert_eq!(target.get("value"), Value::from(2));

    vm.set("x", 3).unwrap();
    fixture.advance(INTERVAL).unwrap();
    assert_eq!(target.get("value"), Value::from(3));
}

#[test]
fn polling_stops_after_last_unsubscribe() {
    let fixture = Fixture::new();
    let vm = ObjectRef::opaque();
    vm.set("x", 1).unwrap();
    let target = ObjectRef::new();
    let binding = fixture.binding(scope_access("x"), Value::from(target), "value", BindingMode::ToView);
    binding.bind(&Scope::new(vm), BindingFlags::empty()).unwrap();
    fixture.flush().unwrap();

    let checker = fixture.dirty_checker().unwrap();
    binding.unbind().unwrap();
    assert_eq!(checker.tracked_count(), 0);
    assert!(!checker.is_scheduled());
    assert_eq!(fixture.timers().pending(), 0);

    let fired = fixture.advance(INTERVAL * 5).unwrap();
    assert_eq!(fired, 0);
}

#[test]
fn two_bindings_share_one_poll() {
    let fixture = Fixture::new();
    let vm = ObjectRef::opaque();
    vm.set("x", "a").unwrap();
    let scope = Scope::new(vm.clone());
    let first = ObjectRef::new();
    let second = ObjectRef::new();
    let a = fixture.binding(scope_access("x"), Value::from(first.clone()), "value", BindingMode::ToView);
    let b = fixture.binding(scope_access("x"), Value::from(second.clone()), "value", BindingMode::ToView);
    a.bind(&scope, BindingFlags::empty()).unwrap();
    b.bind(&scope, BindingFlags::empty()).unwrap();
    fixture.flush().unwrap();

    let checker = fixture.dirty_checker().unwrap();
    assert_eq!(checker.tracked_count(), 1);
    assert_eq!(fixture.timers().pending(), 1);

    vm.set("x", "b").unwrap();
    assert_eq!(fixture.advance(INTERVAL).unwrap(), 1);
    assert_eq!(first.get("value"), Value::from("b"));
    assert_eq!(second.get("value"), Value::from("b"));

    a.unbind().unwrap();
    assert_eq!(checker.tracked_count(), 1);
    b.unbind().unwrap();
    assert_eq!(checker.tracked_count(), 0);
}

#[test]
fn getter_and_host_properties_fall_back_to_polling() {
    let fixture = Fixture::new();
    let counter = Rc::new(Cell::new(0_i32));
    let reads = Rc::clone(&counter);
    let model = ObjectRef::new();
    model.define_getter("ticks", move |_| Value::from(f64::from(reads.get())));
    let header = Node::element("header");
    header.set("title", "draft");
    let vm = ObjectRef::from_pairs([("model", Value::from(model)), ("header", header.to_value())]);

    let ticks = ObjectRef::new();
    let title = ObjectRef::new();
    let scope = Scope::new(vm);
    let ticks_binding = fixture.binding(path("model.ticks"), Value::from(ticks.clone()), "value", BindingMode::ToView);
    let title_binding = fixture.binding(path("header.title"), Value::from(title.clone()), "value", BindingMode::ToView);
    ticks_binding.bind(&scope, BindingFlags::empty()).unwrap();
    title_binding.bind(&scope, BindingFlags::empty()).unwrap();
    fixture.flush().unwrap();

    counter.set(4);
    header.set("title", "final");
    fixture.advance(INTERVAL).unwrap();
    assert_eq!(ticks.get("value"), Value::from(4));
    assert_eq!(title.get("value"), Value::from("final"));
}

#[test]
fn configured_interval_is_honored() {
    let config = RuntimeConfig::default().with_dirty_check_interval(ms(40));
    let fixture = Fixture::with_config(config).unwrap();
    let vm = ObjectRef::opaque();
    vm.set("x", 1).unwrap();
    let target = ObjectRef::new();
    let binding = fixture.binding(scope_access("x"), Value::from(target.clone()), "value", BindingMode::ToView);
    binding.bind(&Scope::new(vm.clone()), BindingFlags::empty()).unwrap();
    fixture.flush().unwrap();

    vm.set("x", 2).unwrap();
    fixture.advance(ms(40)).unwrap();
    assert_eq!(target.get("value"), Value::from(2));
}
