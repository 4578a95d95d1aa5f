// SPDX-License-Identifier: Apache-2.0

//! Helpers adding single operations to a graph through a [`Scope`].

use crate::{DataType, Output, Result, Scope, Tensor};

/// Adds a `Placeholder` fed at run time; `None` leaves the shape unknown.
pub fn placeholder(scope: &Scope, dtype: DataType, shape: Option<&[i64]>) -> Result<Output> {
    let name = scope.make_op_name("Placeholder")?;
    let mut builder = scope
        .graph()
        .new_operation("Placeholder", &name)?
        .set_attr_type("dtype", dtype)?;
    if let Some(shape) = shape {
        builder = builder.set_attr_shape("shape", Some(shape))?;
    }
    Ok(builder.finish()?.output(0))
}

/// Adds a `Const` holding a copy of `value`.
pub fn constant(scope: &Scope, value: &Tensor) -> Result<Output> {
    let name = scope.make_op_name("Const")?;
    let op = scope
        .graph()
        .new_operation("Const", &name)?
        .set_attr_type("dtype", value.data_type()?)?
        .set_attr_tensor("value", value)?
        .finish()?;
    Ok(op.output(0))
}

fn unary(scope: &Scope, op_type: &str, x: &Output) -> Result<Output> {
    let name = scope.make_op_name(op_type)?;
    let op = scope
        .graph()
        .new_operation(op_type, &name)?
        .add_input(x)?
        .finish()?;
    Ok(op.output(0))
}

fn binary(scope: &Scope, op_type: &str, x: &Output, y: &Output) -> Result<Output> {
    let name = scope.make_op_name(op_type)?;
    let op = scope
        .graph()
        .new_operation(op_type, &name)?
        .add_input(x)?
        .add_input(y)?
        .finish()?;
    Ok(op.output(0))
}

pub fn square(scope: &Scope, x: &Output) -> Result<Output> {
    unary(scope, "Square", x)
}

pub fn identity(scope: &Scope, x: &Output) -> Result<Output> {
    unary(scope, "Identity", x)
}

/// Element-wise product, with broadcasting.
pub fn mul(scope: &Scope, x: &Output, y: &Output) -> Result<Output> {
    binary(scope, "Mul", x, y)
}

/// Element-wise sum, with broadcasting.
pub fn add(scope: &Scope, x: &Output, y: &Output) -> Result<Output> {
    binary(scope, "AddV2", x, y)
}

/// Sums same-shaped inputs.
pub fn add_n(scope: &Scope, inputs: &[Output]) -> Result<Output> {
    let name = scope.make_op_name("AddN")?;
    let op = scope
        .graph()
        .new_operation("AddN", &name)?
        .add_input_list(inputs)?
        .finish()?;
    Ok(op.output(0))
}

/// Adds the partial derivatives of the sum of `y` with respect to each `x`.
///
/// The nodes are created under the scope's op name, `Gradients` by default.
pub fn gradients(scope: &Scope, y: &[Output], x: &[Output]) -> Result<Vec<Output>> {
    let prefix = scope.make_op_name("Gradients")?;
    scope.graph().add_gradients(Some(&prefix), y, x, None)
}

/// Like [`gradients`], seeding the gradient of each `y` with `dx`.
pub fn gradients_with_seed(
    scope: &Scope,
    y: &[Output],
    x: &[Output],
    dx: &[Output],
) -> Result<Vec<Output>> {
    let prefix = scope.make_op_name("Gradients")?;
    scope.graph().add_gradients(Some(&prefix), y, x, Some(dx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Graph, Session, SessionOptions};

    #[test]
    fn builds_and_runs() {
        let graph = Graph::new().unwrap();
        let scope = Scope::new(&graph);

        let x = placeholder(&scope, DataType::Float32, Some(&[2])).unwrap();
        let two = constant(&scope, &Tensor::scalar(2.0f32).unwrap()).unwrap();
        let y = add(&scope, &mul(&scope, &x, &two).unwrap(), &square(&scope, &x).unwrap()).unwrap();
        let z = add_n(&scope, &[y.clone(), identity(&scope, &x).unwrap()]).unwrap();

        assert_eq!(y.operation().name().unwrap(), "AddV2");
        assert_eq!(z.shape().unwrap(), Some(vec![2]));

        let session = Session::new(&graph, &SessionOptions::new().unwrap()).unwrap();
        let input = Tensor::new(&[2], &[1.0f32, 3.0]).unwrap();
        let out = session.runner().feed(&x, &input).fetch(&z).run().unwrap();
        // 2x + x^2 + x
        assert_eq!(out[0].as_slice::<f32>().unwrap(), &[4.0, 18.0]);
    }

    #[test]
    fn gradient_prefixes() {
        let graph = Graph::new().unwrap();
        let scope = Scope::new(&graph).with_sub_scope("sub").unwrap();

        let x = placeholder(&scope, DataType::Float32, None).unwrap();
        let y = square(&scope, &x).unwrap();

        let dy = gradients(&scope, &[y.clone()], &[x.clone()]).unwrap();
        assert!(dy[0].operation().name().unwrap().starts_with("sub/Gradients/"));

        let dy = gradients(&scope.with_name("MyGradients").unwrap(), &[y], &[x]).unwrap();
        assert!(dy[0].operation().name().unwrap().starts_with("sub/MyGradients/"));
    }
}
