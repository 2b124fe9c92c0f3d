//! Early-return macros for the typed error variants.

/// Returns an [`Error::InvalidArgument`](crate::Error::InvalidArgument) built from a format string.
#[macro_export]
macro_rules! bail_invalid {
	($($arg:tt)*) => {
		return Err($crate::Error::InvalidArgument(format!($($arg)*)))
	};
}

/// Returns an [`Error::Corruption`](crate::Error::Corruption) built from a format string.
#[macro_export]
macro_rules! bail_corrupt {
	($($arg:tt)*) => {
		return Err($crate::Error::Corruption(format!($($arg)*)))
	};
}

/// Returns an [`Error::Capacity`](crate::Error::Capacity) built from a format string.
#[macro_export]
macro_rules! bail_capacity {
	($($arg:tt)*) => {
		return Err($crate::Error::Capacity(format!($($arg)*)))
	};
}

/// Returns an [`Error::Unsupported`](crate::Error::Unsupported) built from a format string.
#[macro_export]
macro_rules! bail_unsupported {
	($($arg:tt)*) => {
		return Err($crate::Error::Unsupported(format!($($arg)*)))
	};
}

/// Checks an argument invariant, returning [`Error::InvalidArgument`](crate::Error::InvalidArgument) when it does not hold.
#[macro_export]
macro_rules! ensure_arg {
	($cond:expr, $($arg:tt)*) => {
		if !($cond) {
			return Err($crate::Error::InvalidArgument(format!($($arg)*)));
		}
	};
}
