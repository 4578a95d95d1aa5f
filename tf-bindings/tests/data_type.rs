// SPDX-License-Identifier: Apache-2.0

use tfbind::{DataType, Error};

const ALL: [DataType; 5] = [
    DataType::Float32,
    DataType::Int32,
    DataType::UInt8,
    DataType::Int64,
    DataType::String,
];

#[test]
fn c_codes_round_trip() {
    for tag in ALL {
        assert_eq!(DataType::from_c(tag.c()).unwrap(), tag);
        assert_eq!(DataType::from_tf(tag.to_tf()).unwrap(), tag);
    }
    for code in 1..=5 {
        assert_eq!(DataType::from_c(code).unwrap().c(), code);
    }
}

#[test]
fn unknown_code() {
    match DataType::from_c(9999) {
        Err(Error::InvalidArgument(message)) => {
            assert!(message.contains("9999"));
            assert!(message.contains(&tfbind::lite::version()));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(DataType::from_c(-1).is_err());
}

#[test]
fn byte_sizes() {
    let sizes: Vec<i32> = ALL.iter().map(DataType::byte_size).collect();
    assert_eq!(sizes, vec![4, 4, 1, 8, -1]);
}
