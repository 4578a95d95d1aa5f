// SPDX-License-Identifier: Apache-2.0

// since rustc 1.53, bindgen causes UB warnings -- see
// https://github.com/rust-lang/rust-bindgen/issues/1651
#![allow(deref_nullptr)]
#![allow(dead_code)]
#![allow(improper_ctypes)]
#![allow(clippy::all)]

include!(concat!(env!("OUT_DIR"), "/bindings.rs"));

/// `va_list` as bindgen lowers it in function parameters.
#[cfg(all(target_arch = "x86_64", not(windows)))]
pub type VaList = *mut __va_list_tag;
#[cfg(not(all(target_arch = "x86_64", not(windows))))]
pub type VaList = va_list;
