// SPDX-License-Identifier: Apache-2.0

use approx::assert_relative_eq;
use tfbind::{ops, DataType, Graph, Output, Scope, Session, SessionOptions, Tensor};

/// Builds `x`, `y0 = x^2` and `y1 = y0^2`.
fn chain(scope: &Scope) -> (Output, Output, Output) {
    let x = ops::placeholder(scope, DataType::Float32, None).unwrap();
    let y0 = ops::square(scope, &x).unwrap();
    let y1 = ops::square(scope, &y0).unwrap();
    (x, y0, y1)
}

fn eval(graph: &Graph, x: &Output, fetches: &[Output]) -> Vec<f32> {
    let session = Session::new(graph, &SessionOptions::new().unwrap()).unwrap();
    let input = Tensor::scalar(3.0f32).unwrap();
    let out = fetches
        .iter()
        .fold(session.runner().feed(x, &input), |r, f| r.fetch(f))
        .run()
        .unwrap();
    session.close().unwrap();
    out.iter().map(|t| t.as_slice::<f32>().unwrap()[0]).collect()
}

#[test]
fn gradient_chain_single_target() {
    let graph = Graph::new().unwrap();
    let scope = Scope::new(&graph);
    let (x, y0, y1) = chain(&scope);

    let dy = ops::gradients(&scope, &[y1], &[x.clone(), y0]).unwrap();
    assert_eq!(dy.len(), 2);

    let values = eval(&graph, &x, &dy);
    assert_relative_eq!(values[0], 108.0);
    assert_relative_eq!(values[1], 18.0);
}

#[test]
fn gradients_sum_over_targets() {
    let graph = Graph::new().unwrap();
    let scope = Scope::new(&graph);
    let (x, y0, y1) = chain(&scope);

    let dy = ops::gradients(&scope, &[y0, y1], &[x.clone()]).unwrap();
    assert_eq!(dy.len(), 1);
    assert_relative_eq!(eval(&graph, &x, &dy)[0], 114.0);
}

#[test]
fn gradient_with_seed() {
    let graph = Graph::new().unwrap();
    let scope = Scope::new(&graph);
    let (x, y0, y1) = chain(&scope);

    let grad0 = ops::gradients(&scope, &[y1], &[y0.clone()]).unwrap();
    let grad1 = ops::gradients_with_seed(&scope, &[y0], &[x.clone()], &grad0).unwrap();
    assert_relative_eq!(eval(&graph, &x, &grad1)[0], 108.0);
}

#[test]
fn seed_count_must_match_targets() {
    let graph = Graph::new().unwrap();
    let scope = Scope::new(&graph);
    let (x, y0, y1) = chain(&scope);

    let err = ops::gradients_with_seed(&scope, &[y0, y1], &[x.clone()], &[x]).unwrap_err();
    assert!(matches!(err, tfbind::Error::InvalidArgument(_)));
}

#[test]
fn scoped_gradient_names() {
    let graph = Graph::new().unwrap();
    let scope = Scope::new(&graph).with_sub_scope("sub").unwrap();
    let (x, _, y1) = chain(&scope);

    let dy = ops::gradients(&scope, &[y1.clone()], &[x.clone()]).unwrap();
    assert!(dy[0].operation().name().unwrap().starts_with("sub/Gradients/"));

    let named = scope.with_name("MyGradients").unwrap();
    let dy = ops::gradients(&named, &[y1], &[x]).unwrap();
    assert!(dy[0].operation().name().unwrap().starts_with("sub/MyGradients/"));
}
