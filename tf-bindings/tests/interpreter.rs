// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::io::Write;
use tfbind::lite::{InputBuffer, Interpreter, Model, NdArray, Options, OutputBuffer};
use tfbind::{DataType, Error};

/// `y = x * [3, 4]` and `z = x + x` over an input of shape `[?, 2]`.
const MODEL: &[u8] = b"TFLB\n\
    # two outputs sharing one input\n\
    inputs: x\n\
    outputs: y, z\n\
    x = Placeholder() dtype=float shape=[?, 2]\n\
    w = Const() value=[3.0, 4.0]\n\
    y = Mul(x, w)\n\
    z = AddV2(x, x)\n";

const STRINGS: &[u8] = b"TFLB\n\
    inputs: s\n\
    outputs: t\n\
    s = Placeholder() dtype=string shape=[?]\n\
    t = Identity(s)\n";

fn interpreter() -> Interpreter {
    Interpreter::from_bytes(MODEL.to_vec(), Options::default()).unwrap()
}

#[test]
fn smoke() {
    let mut interpreter = interpreter();
    let input = NdArray::new(&[1, 2], vec![1.0f32, 2.0]).unwrap();
    let mut output = NdArray::empty(DataType::Float32);

    interpreter.run(&input, &mut output).unwrap();
    assert_eq!(output.dims(), interpreter.output_tensor(0).unwrap().shape());
    assert_eq!(output.as_slice::<f32>().unwrap(), &[3.0, 8.0]);

    interpreter.close();
    interpreter.close();
    let err = interpreter.run(&input, &mut output).unwrap_err();
    assert!(err.is_closed());
    assert!(matches!(err, Error::InterpreterClosed));
}

#[test]
fn multiple_outputs() {
    let mut interpreter = interpreter();
    let input = NdArray::new(&[3, 2], vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
    let mut y = NdArray::empty(DataType::Float32);
    let mut z = [0u8; 24];

    let mut outputs: HashMap<usize, OutputBuffer> = HashMap::new();
    outputs.insert(0, (&mut y).into());
    outputs.insert(1, (&mut z[..]).into());
    interpreter
        .run_for_multiple_inputs_outputs(&[InputBuffer::from(&input)], &mut outputs)
        .unwrap();
    drop(outputs);

    assert_eq!(y.dims(), &[3, 2]);
    assert_eq!(
        y.as_slice::<f32>().unwrap(),
        &[3.0, 8.0, 9.0, 16.0, 15.0, 24.0]
    );
    assert_eq!(
        bytemuck::cast_slice::<u8, f32>(&z),
        &[2.0, 4.0, 6.0, 8.0, 10.0, 12.0]
    );
    interpreter.close();
}

#[test]
fn empty_inputs_and_outputs() {
    let mut interpreter = interpreter();
    let input = NdArray::new(&[1, 2], vec![1.0f32, 2.0]).unwrap();

    let mut outputs = HashMap::new();
    let err = interpreter
        .run_for_multiple_inputs_outputs(&[], &mut outputs)
        .unwrap_err();
    assert!(err.to_string().contains("Inputs should not be null or empty."));

    let err = interpreter
        .run_for_multiple_inputs_outputs(&[InputBuffer::from(&input)], &mut outputs)
        .unwrap_err();
    assert!(err.to_string().contains("Outputs should not be null or empty."));
    interpreter.close();
}

#[test]
fn resize_then_bytes() {
    let mut interpreter = interpreter();
    interpreter.resize_input(0, &[2, 2]).unwrap();

    let input: Vec<u8> = bytemuck::cast_slice(&[1.0f32, 1.0, 2.0, 2.0]).to_vec();
    let mut output = [0u8; 16];
    interpreter.run(&input[..], &mut output[..]).unwrap();
    assert_eq!(
        bytemuck::cast_slice::<u8, f32>(&output),
        &[3.0, 4.0, 6.0, 8.0]
    );

    // The runtime's own diagnostic is passed through.
    let err = interpreter.resize_input(0, &[2, 3]).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    assert!(err.to_string().contains("declared as"));
    assert!(matches!(
        interpreter.resize_input(4, &[1, 2]),
        Err(Error::InvalidArgument(_))
    ));
    interpreter.close();
}

#[test]
fn names_and_indices() {
    let mut interpreter = interpreter();
    assert_eq!(interpreter.input_tensor_count().unwrap(), 1);
    assert_eq!(interpreter.output_tensor_count().unwrap(), 2);
    assert_eq!(interpreter.input_index("x").unwrap(), 0);
    assert_eq!(interpreter.output_index("z").unwrap(), 1);

    let err = interpreter.input_index("nope").unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    assert!(err.to_string().contains("'nope' is not a valid name for any input"));
    assert!(interpreter.output_index("x").is_err());

    assert!(interpreter.input_tensor(1).is_err());
    let err = interpreter.output_tensor(2).unwrap_err();
    assert_eq!(err.to_string(), "Invalid argument: Invalid output Tensor index: 2");

    let tensor = interpreter.input_tensor(0).unwrap();
    assert_eq!(tensor.name(), "x");
    assert_eq!(tensor.data_type().unwrap(), DataType::Float32);
    assert_eq!(tensor.shape(), vec![1, 2]);
    assert_eq!(tensor.byte_size(), 8);
    interpreter.close();
}

#[test]
fn inference_duration() {
    let mut interpreter = interpreter();
    assert_eq!(
        interpreter.last_native_inference_duration_nanoseconds().unwrap(),
        None
    );

    let input = NdArray::new(&[1, 2], vec![0.5f32, 0.5]).unwrap();
    let mut output = NdArray::empty(DataType::Float32);
    interpreter.run(&input, &mut output).unwrap();
    let elapsed = interpreter
        .last_native_inference_duration_nanoseconds()
        .unwrap()
        .unwrap();
    assert!(elapsed >= 0);

    interpreter.close();
    assert!(interpreter
        .last_native_inference_duration_nanoseconds()
        .is_err());
}

#[test]
fn type_mismatch() {
    let mut interpreter = interpreter();
    let input = NdArray::new(&[1, 2], vec![1i32, 2]).unwrap();
    let mut output = NdArray::empty(DataType::Float32);
    assert!(matches!(
        interpreter.run(&input, &mut output),
        Err(Error::InvalidArgument(_))
    ));
    interpreter.close();
}

#[test]
fn string_tensors() {
    let mut interpreter = Interpreter::from_bytes(STRINGS.to_vec(), Options::default()).unwrap();
    let input = NdArray::from_strings(&[2], vec![b"hello".to_vec(), b"lite".to_vec()]).unwrap();
    let mut output = NdArray::empty(DataType::String);

    // The C API only copies into existing storage, which string inputs lack.
    let err = interpreter.run(&input, &mut output).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    assert!(err.to_string().contains("cannot allocate string tensors"));

    // Strings have no fixed width.
    let raw = [0u8; 8];
    let mut out = [0u8; 8];
    assert!(interpreter.run(&raw[..], &mut out[..]).is_err());
    interpreter.close();
}

#[test]
fn create_failure_carries_runtime_message() {
    let model = b"TFLB\n\
        inputs: w\n\
        outputs: w\n\
        w = Const() value=[1.0]\n";
    let err = Interpreter::from_bytes(model.to_vec(), Options::default())
        .err()
        .unwrap();
    assert!(matches!(
        err,
        Error::Native {
            code: tfbind::Code::Internal,
            ..
        }
    ));
    assert!(err.to_string().contains("not a Placeholder"));
}

#[test]
fn from_file_and_mapped() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(MODEL).unwrap();

    for mut interpreter in [
        Interpreter::from_file(file.path(), Options::default()).unwrap(),
        Interpreter::from_mapped_file(file.path(), Options::default()).unwrap(),
        Interpreter::from_model(Model::from_file(file.path()).unwrap(), Options::default())
            .unwrap(),
    ] {
        assert_eq!(interpreter.output_tensor_count().unwrap(), 2);
        interpreter.close();
    }
}

#[test]
#[allow(deprecated)]
fn deprecated_mutators() {
    let mut interpreter = interpreter();
    interpreter.set_num_threads(3).unwrap();
    interpreter.set_use_nnapi(true).unwrap();
    assert_eq!(interpreter.options().num_threads(), 3);
    assert!(interpreter.options().use_nnapi());

    interpreter.close();
    assert!(matches!(
        interpreter.set_num_threads(1),
        Err(Error::InterpreterClosed)
    ));
}
