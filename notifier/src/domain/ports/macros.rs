//! Defines helper macros for generating domain port error enums.

macro_rules! define_port_error {
    (@ctor $variant:ident) => {
        ::paste::paste! {
            pub fn [<$variant:snake>]() -> Self {
                Self::$variant
            }
        }
    };

    (@ctor $variant:ident { $($field:ident : $ty:ty),* $(,)? }) => {
        define_port_error!(@ctor_impl $variant () () $( $field : $ty, )*);
    };

    (@ctor_impl $variant:ident ($($params:tt)*) ($($inits:tt)*) ) => {
        ::paste::paste! {
            pub fn [<$variant:snake>]($($params)*) -> Self {
                Self::$variant { $($inits)* }
            }
        }
    };

    (@ctor_impl $variant:ident ($($params:tt)*) ($($inits:tt)*) $field:ident : $ty:ty, $($rest:tt)*) => {
        define_port_error!(
            @ctor_impl
            $variant
            ($($params)* $field: impl Into<$ty>,)
            ($($inits)* $field: $field.into(),)
            $($rest)*
        );
    };
    (
        $(#[$outer:meta])*
        pub enum $name:ident {
            $(
                $(#[$variant_meta:meta])*
                $variant:ident $( { $($field:ident : $ty:ty),* $(,)? } )? => $message:expr
            ),* $(,)?
        }
    ) => {
        $(#[$outer])*
        #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
        pub enum $name {
            $(
                $(#[$variant_meta])*
                #[error($message)]
                $variant $( { $($field : $ty),* } )?,
            )*
        }

        impl $name {
            $(
                define_port_error!(@ctor $variant $( { $($field : $ty),* } )?);
            )*
        }
    };
}

pub(crate) use define_port_error;

#[cfg(test)]
mod tests {
    //! Constructor coverage for generated store error enums.
    use std::time::Duration;

    define_port_error! {
        pub enum ExampleStoreError {
            Unavailable { message: String } => "store unavailable: {message}",
            Throttled { retry_after: Option<Duration>, message: String } =>
                "store throttled: {message}",
            Closed => "store closed",
        }
    }

    #[test]
    fn constructors_accept_str_for_string_fields() {
        let err = ExampleStoreError::unavailable("dns lookup failed");
        assert_eq!(err.to_string(), "store unavailable: dns lookup failed");
    }

    #[test]
    fn constructors_preserve_non_string_types() {
        let err = ExampleStoreError::throttled(Some(Duration::from_secs(2)), "slow down");
        assert_eq!(
            err,
            ExampleStoreError::Throttled {
                retry_after: Some(Duration::from_secs(2)),
                message: "slow down".to_owned(),
            }
        );
    }

    #[test]
    fn unit_variants_get_snake_case_constructors() {
        assert_eq!(ExampleStoreError::closed().to_string(), "store closed");
    }
}
