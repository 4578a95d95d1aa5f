// SPDX-License-Identifier: Apache-2.0

use env_logger::Env;
use log::info;
use tfbind::{ops, DataType, Graph, Scope, Session, SessionOptions, Tensor};

fn main() -> tfbind::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("debug")).init();

    info!("TensorFlow {}", tfbind::version());

    let graph = Graph::new()?;
    let scope = Scope::new(&graph);

    // y = x^4, built as (x^2)^2
    let x = ops::placeholder(&scope, DataType::Float32, None)?;
    let x2 = ops::square(&scope, &x)?;
    let y = ops::square(&scope, &x2)?;

    let dy = ops::gradients(&scope.with_sub_scope("grad")?, &[y.clone()], &[x.clone()])?;
    info!("Gradient node {}", dy[0].operation());

    let session = Session::new(&graph, &SessionOptions::new()?)?;
    let input = Tensor::scalar(3.0f32)?;
    let out = session
        .runner()
        .feed(&x, &input)
        .fetch(&y)
        .fetch(&dy[0])
        .run()?;

    println!("y(3)  = {}", out[0].as_slice::<f32>()?[0]);
    println!("y'(3) = {}", out[1].as_slice::<f32>()?[0]);

    session.close()?;
    graph.close()?;
    Ok(())
}
