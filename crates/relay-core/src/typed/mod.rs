//! Typed - 型付き Task API
//!
//! task name の typo を型で排除し、Handler との対応付けを静的に保証します。
//!
//! # 二層構造
//! - **表層（Typed）**: `Task` trait, `Handler<T>` trait - 型安全
//! - **内部（Dyn）**: `UnitOfWork` trait - object-safe, arguments のまま扱う

pub mod codec;
pub mod handler;
pub mod task;

pub use self::codec::{CodecError, decode, encode, encode_tracked};
pub use self::handler::{Handler, TypedWork};
pub use self::task::Task;
