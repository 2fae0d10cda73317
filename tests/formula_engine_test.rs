//! End-to-end behaviour of formula traces inside a [`TraceModel`].

use std::sync::Arc;
use std::time::Duration;

use daq_traces::clock::ManualClock;
use daq_traces::events::TraceEvent;
use daq_traces::model::{ModelOptions, TraceModel};
use daq_traces::sample::{Domain, Sample};
use daq_traces::trace::TraceStatus;
use daq_traces::transform::{ExpressionTransform, MedianFilter};
use daq_traces::{TraceError, TraceId};

fn manual_model() -> (TraceModel, ManualClock) {
    let clock = ManualClock::new();
    let model = TraceModel::with_options(ModelOptions::default(), Arc::new(clock.clone()));
    (model, clock)
}

fn trace_with(model: &mut TraceModel, name: &str, domain: Domain, points: &[(f64, f64)]) -> TraceId {
    let id = model.create_trace(name);
    for &(x, y) in points {
        model
            .add_data(id, Sample::real(x, y), domain, 50.0, None)
            .unwrap();
    }
    id
}

fn output(model: &TraceModel, id: TraceId) -> Vec<(f64, f64)> {
    model
        .trace(id)
        .unwrap()
        .output()
        .iter()
        .map(|s| (s.x, s.y.re))
        .collect()
}

#[test]
fn sum_of_two_sources_over_the_full_grid() {
    let (mut model, _clock) = manual_model();
    let xs: Vec<(f64, f64)> = (0..10).map(|k| (k as f64, k as f64 * 2.0)).collect();
    let ys: Vec<(f64, f64)> = (0..10).map(|k| (k as f64, 100.0 - k as f64)).collect();
    let x = trace_with(&mut model, "X", Domain::Frequency, &xs);
    let y = trace_with(&mut model, "Y", Domain::Frequency, &ys);

    let m = model.create_trace("Sum");
    model.set_math(m).unwrap();
    model.set_expression(m, "x+y").unwrap();
    model.add_source(m, x, "x").unwrap();
    model.add_source(m, y, "y").unwrap();
    model.flush();

    let result = output(&model, m);
    assert_eq!(result.len(), 10);
    for (k, (coordinate, value)) in result.into_iter().enumerate() {
        assert_eq!(coordinate, k as f64);
        assert_eq!(value, xs[k].1 + ys[k].1);
    }
    assert_eq!(model.trace(m).unwrap().status(), &TraceStatus::Ok);
}

#[test]
fn product_then_transform_toggle() {
    let (mut model, _clock) = manual_model();
    let a = trace_with(&mut model, "A", Domain::Frequency, &[(1.0, 1.0), (2.0, 2.0), (3.0, 3.0)]);
    let b = trace_with(&mut model, "B", Domain::Frequency, &[(1.0, 4.0), (2.0, 5.0), (3.0, 6.0)]);

    let m = model.create_trace("M");
    model.set_math(m).unwrap();
    model.set_expression(m, "a*b").unwrap();
    model.add_source(m, a, "a").unwrap();
    model.add_source(m, b, "b").unwrap();
    model.flush();
    assert_eq!(output(&model, m), vec![(1.0, 4.0), (2.0, 10.0), (3.0, 18.0)]);

    model
        .update(m, |t| t.add_transform(Box::new(ExpressionTransform::new("y / 2"))))
        .unwrap();
    assert_eq!(output(&model, m), vec![(1.0, 2.0), (2.0, 5.0), (3.0, 9.0)]);

    // the identity node of M is its own computed store
    model.update(m, |t| t.set_transform_enabled(1, false)).unwrap().unwrap();
    assert_eq!(output(&model, m), vec![(1.0, 4.0), (2.0, 10.0), (3.0, 18.0)]);
    assert_eq!(model.trace(m).unwrap().output(), model.trace(m).unwrap().samples());

    model.update(m, |t| t.set_transform_enabled(1, true)).unwrap().unwrap();
    assert_eq!(output(&model, m), vec![(1.0, 2.0), (2.0, 5.0), (3.0, 9.0)]);
}

#[test]
fn consumers_read_the_transformed_output_of_sources() {
    let (mut model, _clock) = manual_model();
    let a = trace_with(
        &mut model,
        "A",
        Domain::Frequency,
        &[(0.0, 1.0), (1.0, 1.0), (2.0, 9.0), (3.0, 1.0), (4.0, 1.0)],
    );
    model
        .update(a, |t| t.add_transform(Box::new(MedianFilter::new(3))))
        .unwrap();

    let m = model.create_trace("M");
    model.set_math(m).unwrap();
    model.set_expression(m, "a").unwrap();
    model.add_source(m, a, "a").unwrap();
    model.flush();
    assert_eq!(
        output(&model, m),
        vec![(0.0, 1.0), (1.0, 1.0), (2.0, 1.0), (3.0, 1.0), (4.0, 1.0)]
    );
}

#[test]
fn cycles_and_mixed_domains_are_rejected() {
    let (mut model, _clock) = manual_model();
    let a = trace_with(&mut model, "A", Domain::Frequency, &[(0.0, 1.0)]);
    let t = trace_with(&mut model, "T", Domain::Time, &[(0.0, 1.0)]);

    let m1 = model.create_trace("M1");
    model.set_math(m1).unwrap();
    model.add_source(m1, a, "a").unwrap();
    let m2 = model.create_trace("M2");
    model.set_math(m2).unwrap();
    model.add_source(m2, m1, "m").unwrap();

    assert!(model.depends_on(m2, a));
    assert!(matches!(
        model.add_source(m1, m2, "back"),
        Err(TraceError::CyclicDependency { .. })
    ));
    assert!(matches!(
        model.add_source(m1, m1, "me"),
        Err(TraceError::SelfDependency(_))
    ));
    assert!(matches!(
        model.add_source(m1, t, "t"),
        Err(TraceError::DomainMismatch { .. })
    ));
    assert_eq!(model.sources_of(m1).len(), 1);
    assert!(!model.can_add_source(m1, m2));
    assert!(model.can_add_source(m2, a));
}

#[test]
fn deleting_a_source_keeps_the_other_bindings() {
    let (mut model, _clock) = manual_model();
    let a = trace_with(&mut model, "A", Domain::Frequency, &[(0.0, 1.0), (1.0, 2.0)]);
    let b = trace_with(&mut model, "B", Domain::Frequency, &[(0.0, 10.0), (1.0, 20.0)]);
    let m = model.create_trace("M");
    model.set_math(m).unwrap();
    model.set_expression(m, "a").unwrap();
    model.add_source(m, a, "a").unwrap();
    model.add_source(m, b, "b").unwrap();
    model.flush();
    model.drain_events();

    model.delete(b).unwrap();
    model.flush();

    assert!(model.trace(b).is_none());
    let bindings = model.sources_of(m);
    assert_eq!(bindings.len(), 1);
    assert_eq!(bindings[0].source, a);
    assert_eq!(bindings[0].variable, "a");
    assert_eq!(output(&model, m), vec![(0.0, 1.0), (1.0, 2.0)]);

    let events = model.drain_events();
    let removed = events
        .iter()
        .position(|e| *e == TraceEvent::SourceRemoved { consumer: m, source: b })
        .unwrap();
    let deleted = events
        .iter()
        .position(|e| *e == TraceEvent::Deleted(b))
        .unwrap();
    assert!(removed < deleted);
}

#[test]
fn deleting_the_last_source_empties_the_formula() {
    let (mut model, _clock) = manual_model();
    let a = trace_with(&mut model, "A", Domain::Frequency, &[(0.0, 1.0), (1.0, 2.0)]);
    let m = model.create_trace("M");
    model.set_math(m).unwrap();
    model.set_expression(m, "a").unwrap();
    model.add_source(m, a, "a").unwrap();
    model.flush();

    model.delete(a).unwrap();
    model.flush();
    assert!(model.trace(m).unwrap().is_empty());
    assert!(model.sources_of(m).is_empty());
}

#[test]
fn chained_formulas_update_after_the_debounce_interval() {
    let (mut model, clock) = manual_model();
    let a = trace_with(&mut model, "A", Domain::Frequency, &[(0.0, 1.0), (1.0, 1.0), (2.0, 1.0)]);
    let m1 = model.create_trace("M1");
    model.set_math(m1).unwrap();
    model.set_expression(m1, "a * 2").unwrap();
    model.add_source(m1, a, "a").unwrap();
    let m2 = model.create_trace("M2");
    model.set_math(m2).unwrap();
    model.set_expression(m2, "m + 1").unwrap();
    model.add_source(m2, m1, "m").unwrap();
    model.flush();
    assert_eq!(output(&model, m2), vec![(0.0, 3.0), (1.0, 3.0), (2.0, 3.0)]);

    model
        .add_data(a, Sample::real(2.0, 5.0), Domain::Frequency, 50.0, None)
        .unwrap();
    assert_eq!(output(&model, m2)[2], (2.0, 3.0));
    assert!(model.next_deadline().is_some());

    clock.advance(Duration::from_millis(50));
    assert_eq!(model.poll(), 0);
    assert_eq!(output(&model, m1)[2], (2.0, 2.0));

    clock.advance(Duration::from_millis(50));
    assert_eq!(model.poll(), 1);
    assert_eq!(output(&model, m1)[2], (2.0, 10.0));
    assert_eq!(output(&model, m2)[2], (2.0, 11.0));
    assert!(model.next_deadline().is_none());
}

#[test]
fn expression_errors_leave_undefined_cells() {
    let (mut model, _clock) = manual_model();
    let a = trace_with(&mut model, "A", Domain::Frequency, &[(0.0, 1.0), (1.0, 2.0)]);
    let m = model.create_trace("M");
    model.set_math(m).unwrap();
    model.set_expression(m, "a +* 2").unwrap();
    model.add_source(m, a, "a").unwrap();
    model.flush();

    let trace = model.trace(m).unwrap();
    assert!(matches!(trace.status(), TraceStatus::Error(_)));
    assert_eq!(trace.len(), 2);
    assert!(trace.output().iter().all(Sample::is_undefined));
    assert!(!model.is_formula_valid(m));
}
