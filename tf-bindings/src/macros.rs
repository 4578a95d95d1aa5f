// SPDX-License-Identifier: Apache-2.0

/// Implements Handle with minimal boilerplate.
macro_rules! impl_component_handle {
    (
        $struct_name:ident,
        $c_type:ty,
        $ptr_field:ident
    ) => {
        impl crate::handle::Handle for $struct_name {
            type CType = $c_type;

            fn as_ptr(&self) -> *const Self::CType {
                self.$ptr_field.as_ptr() as *const Self::CType
            }

            fn as_mut_ptr(&mut self) -> *mut Self::CType {
                self.$ptr_field.as_ptr()
            }

            unsafe fn from_ptr(ptr: *mut Self::CType) -> crate::Result<Self> {
                std::ptr::NonNull::new(ptr)
                    .map(|$ptr_field| $struct_name { $ptr_field })
                    .ok_or(crate::Error::EmptyValue)
            }
        }
    };
}

/// Implements Drop through the native deleter.
///
/// The native deleters return nothing, so there is no failure to report.
macro_rules! impl_component_drop {
    ($struct_name:ident, $drop_fn:ident, $ptr_field:ident) => {
        impl Drop for $struct_name {
            fn drop(&mut self) {
                unsafe { crate::ffi::$drop_fn(self.$ptr_field.as_ptr()) };
                log::trace!("Deleted {}", stringify!($struct_name));
            }
        }
    };
}

/// Implements a complete component with Handle and Drop.
macro_rules! define_component {
    (
        $(#[$attr:meta])*
        $vis:vis $struct_name:ident,
        $c_type:ty,
        drop: $drop_fn:ident
    ) => {
        $(#[$attr])*
        $vis struct $struct_name {
            ptr: std::ptr::NonNull<$c_type>,
        }

        impl_component_handle!($struct_name, $c_type, ptr);

        impl_component_drop!($struct_name, $drop_fn, ptr);

        unsafe impl Send for $struct_name {}
    };
}

/// Implements TensorType and data type enum methods for Rust types
macro_rules! impl_tensor_types {
    ($enum_type:ident, $array_type:ident; $($type:ty => $variant:ident),* $(,)?) => {
        $(
            impl TensorType for $type {
                fn data_type() -> $enum_type {
                    $enum_type::$variant
                }

                fn into_array(data: Vec<Self>) -> $array_type {
                    $array_type::$variant(data)
                }

                fn from_array(data: &$array_type) -> Option<&[Self]> {
                    match data {
                        $array_type::$variant(v) => Some(v),
                        _ => None,
                    }
                }
            }
        )*

        impl $enum_type {
            /// Returns the name of the corresponding Rust type
            pub fn type_name(&self) -> &'static str {
                match self {
                    $($enum_type::$variant => stringify!($type),)*
                    #[allow(unreachable_patterns)]
                    _ => "unknown",
                }
            }

            /// Returns the size of the corresponding Rust type in bytes if
            /// there is one
            pub fn try_size_of(&self) -> Option<usize> {
                match self {
                    $($enum_type::$variant => Some(std::mem::size_of::<$type>()),)*
                    #[allow(unreachable_patterns)]
                    _ => None,
                }
            }
        }
    };
}
