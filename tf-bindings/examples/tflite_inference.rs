// SPDX-License-Identifier: Apache-2.0

use env_logger::Env;
use log::{error, info};
use std::path::PathBuf;
use tfbind::lite::{Interpreter, NdArray, Options};
use tfbind::DataType;

fn main() -> tfbind::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("debug")).init();

    info!("TensorFlow Lite {}", tfbind::lite::version());

    let path = match std::env::args().nth(1) {
        Some(path) => PathBuf::from(path),
        None => {
            error!("Usage: tflite_inference <model.tflite>");
            return Err(tfbind::Error::InvalidArgument(
                "No model path given".to_string(),
            ));
        }
    };

    let options = Options::builder().num_threads(2).build();
    let mut interpreter = Interpreter::from_file(&path, options)?;
    info!(
        "Loaded {} with {} input(s) and {} output(s)",
        path.display(),
        interpreter.input_tensor_count()?,
        interpreter.output_tensor_count()?
    );

    // Prepare data for inference, one batch of a float32 input
    let dims: Vec<i32> = interpreter
        .input_tensor(0)?
        .shape()
        .iter()
        .map(|d| (*d).max(1))
        .collect();
    let count = dims.iter().product::<i32>() as usize;
    let input = NdArray::new(&dims, (0..count).map(|i| i as f32).collect())?;
    let mut output = NdArray::empty(DataType::Float32);

    if let Err(e) = interpreter.run(&input, &mut output) {
        error!("Inference failed: {}", e);
        interpreter.close();
        return Err(e);
    }

    println!("Success!");
    let out_tensor = interpreter.output_tensor(0)?;
    println!(
        "Output tensor {} => type:{:?} shape:{:?}",
        out_tensor.name(),
        out_tensor.data_type()?,
        out_tensor.shape()
    );
    println!("Result Tensor:");
    for d in output.as_slice::<f32>().unwrap_or_default().iter().take(10) {
        println!("{:.6}", d);
    }
    if let Some(ns) = interpreter.last_native_inference_duration_nanoseconds()? {
        info!("Inference took {} ns", ns);
    }

    interpreter.close();
    Ok(())
}
