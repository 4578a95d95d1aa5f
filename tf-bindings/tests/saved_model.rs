// SPDX-License-Identifier: Apache-2.0

use std::fs;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;
use tfbind::{Code, Error, SavedModelBundle, Tensor};

const MODEL: &str = "\
[serve]
x = Placeholder() dtype=float shape=[?]
three = Const() value=3.0
y = Mul(x, three)

[train, gpu]
x = Placeholder() dtype=float shape=[?]
y = Square(x)
";

fn export_dir() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("saved_model.txt"), MODEL).unwrap();
    dir
}

fn run(bundle: &SavedModelBundle, x: &[f32]) -> Vec<f32> {
    let graph = bundle.graph();
    let input = graph.operation("x").unwrap().unwrap().output(0);
    let output = graph.operation("y").unwrap().unwrap().output(0);

    let value = Tensor::new(&[x.len() as i64], x).unwrap();
    let out = bundle
        .session()
        .runner()
        .feed(&input, &value)
        .fetch(&output)
        .run()
        .unwrap();
    out[0].as_slice::<f32>().unwrap().to_vec()
}

#[test]
fn load_with_default_tags() {
    let dir = export_dir();
    let bundle = SavedModelBundle::loader(dir.path()).load().unwrap();
    assert_eq!(run(&bundle, &[1.0, 2.0]), vec![3.0, 6.0]);
    assert!(!bundle.meta_graph_def().is_empty());

    bundle.close().unwrap();
    bundle.close().unwrap();
    assert!(bundle.graph().is_closed());
    assert!(bundle.session().is_closed());
}

#[test]
fn load_matches_loader() {
    let dir = export_dir();
    let a = SavedModelBundle::load(dir.path(), &["gpu", "train"]).unwrap();
    let b = SavedModelBundle::loader(dir.path())
        .with_tags(&["gpu", "train"])
        .with_config_proto(&[])
        .with_run_options(&[])
        .load()
        .unwrap();

    assert_eq!(a.meta_graph_def(), b.meta_graph_def());
    assert_eq!(run(&a, &[3.0]), run(&b, &[3.0]));
    assert_eq!(run(&a, &[3.0]), vec![9.0]);
    a.close().unwrap();
    b.close().unwrap();
}

#[test]
fn unknown_tags() {
    let dir = export_dir();
    let err = SavedModelBundle::load(dir.path(), &["train"]).unwrap_err();
    assert!(matches!(
        err,
        Error::Native {
            code: Code::NotFound,
            ..
        }
    ));
}

#[test]
fn closed_bundle() {
    let dir = export_dir();
    let bundle = SavedModelBundle::load(dir.path(), &["serve"]).unwrap();
    bundle.close().unwrap();

    assert!(matches!(
        bundle.graph().operation("x"),
        Err(Error::GraphClosed)
    ));
    assert!(bundle.session().runner().run().unwrap_err().is_closed());
}

#[test]
fn close_releases_session_before_graph() {
    let dir = export_dir();
    let bundle = SavedModelBundle::load(dir.path(), &["serve"]).unwrap();
    let pin = bundle.graph().reference().unwrap();

    thread::scope(|s| {
        let closer = s.spawn(|| bundle.close());

        // The graph cannot finish closing while pinned here.
        while !bundle.graph().is_closed() {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(bundle.session().is_closed());
        assert!(bundle.session().runner().run().unwrap_err().is_closed());

        drop(pin);
        closer.join().unwrap().unwrap();
    });
}
