// SPDX-License-Identifier: Apache-2.0

use std::collections::HashSet;
use std::sync::mpsc;
use std::thread;
use tfbind::{ops, DataType, Error, Graph, Operation, Scope};

fn add_n_graph() -> (Graph, Operation) {
    let graph = Graph::new().unwrap();
    let op = {
        let scope = Scope::new(&graph);
        let x = ops::placeholder(&scope, DataType::Float32, Some(&[2])).unwrap();
        let y = ops::square(&scope, &x).unwrap();
        ops::add_n(&scope, &[x, y]).unwrap().operation().clone()
    };
    (graph, op)
}

#[test]
fn outputs_are_well_formed() {
    let (graph, op) = add_n_graph();
    for i in 0..op.num_outputs().unwrap() {
        let output = op.output(i);
        assert_eq!(output.operation(), &op);
        assert_eq!(output.index(), i);
        assert_eq!(output.data_type().unwrap(), DataType::Float32);
    }

    let list = op.output_list(0, 1);
    assert_eq!(list, vec![op.output(0)]);
    graph.close().unwrap();
}

#[test]
fn list_lengths() {
    let (_graph, op) = add_n_graph();
    assert_eq!(op.input_list_length("inputs").unwrap(), 2);
    assert_eq!(op.output_list_length("sum").unwrap(), 1);

    assert!(matches!(
        op.output_list_length("nope"),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        op.input_list_length("sum"),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn identity_and_display() {
    let (graph, op) = add_n_graph();
    let same = graph.operation("AddN").unwrap().unwrap();
    assert_eq!(op, same);

    let set: HashSet<Operation> = graph.operations().unwrap().into_iter().collect();
    assert!(set.contains(&op));
    assert_eq!(set.len(), 3);

    let (other, other_op) = add_n_graph();
    assert_ne!(op, other_op);

    assert_eq!(
        op.to_string(),
        format!("<{} '{}'>", op.op_type().unwrap(), op.name().unwrap())
    );
    assert_eq!(op.to_string(), "<AddN 'AddN'>");
    other.close().unwrap();
}

#[test]
fn accessors_fail_after_close() {
    let (graph, op) = add_n_graph();
    let output = op.output(0);
    graph.close().unwrap();
    graph.close().unwrap();

    assert!(matches!(graph.reference(), Err(Error::GraphClosed)));
    assert!(matches!(graph.operation("AddN"), Err(Error::GraphClosed)));
    assert!(matches!(graph.operations(), Err(Error::GraphClosed)));
    assert!(matches!(op.name(), Err(Error::GraphClosed)));
    assert!(matches!(op.op_type(), Err(Error::GraphClosed)));
    assert!(matches!(op.num_outputs(), Err(Error::GraphClosed)));
    assert!(matches!(op.shape(0), Err(Error::GraphClosed)));
    assert!(matches!(output.data_type(), Err(Error::GraphClosed)));
    assert!(matches!(
        graph.new_operation("NoOp", "noop"),
        Err(Error::GraphClosed)
    ));
    assert_eq!(op.to_string(), "<closed operation>");
}

#[test]
fn close_waits_for_outstanding_references() {
    let (graph, op) = add_n_graph();
    let (pinned_tx, pinned_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let (graph, op) = (&graph, &op);

    thread::scope(|s| {
        let reader = s.spawn(move || {
            let reference = graph.reference().unwrap();
            pinned_tx.send(()).unwrap();
            release_rx.recv().unwrap();

            // Close has begun: new pins are refused but ours stays valid.
            let name = op.name();
            let mut pos = 0;
            let first = unsafe { tfbind::ffi::TF_GraphNextOperation(reference.as_ptr(), &mut pos) };
            reference.release();
            (name, first.is_null())
        });

        pinned_rx.recv().unwrap();
        let closer = s.spawn(move || graph.close());
        while !graph.is_closed() {
            thread::yield_now();
        }
        assert!(matches!(graph.reference(), Err(Error::GraphClosed)));
        release_tx.send(()).unwrap();

        let (name, null) = reader.join().unwrap();
        assert!(matches!(name, Err(Error::GraphClosed)));
        assert!(!null);
        closer.join().unwrap().unwrap();
    });
}

#[test]
fn concurrent_readers() {
    let (graph, op) = add_n_graph();
    thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                for _ in 0..100 {
                    assert_eq!(op.op_type().unwrap(), "AddN");
                    assert!(graph.operation("AddN").unwrap().is_some());
                }
            });
        }
    });
    graph.close().unwrap();
}
