//! Generated protobuf modules
//!
//! Includes the code generated from `protos/meshtac.proto`, the subset of the
//! radio serial API this tool speaks.

pub mod radio_generated {
    //! Generated radio serial API types.
    //! build.rs compiles protos/; prost emits one file per package (meshtac.rs).
    //! We wrap the include in a submodule with broad allow() attributes to suppress
    //! dead_code/unused warnings for portions of the API we don't (yet) use.
    #[allow(dead_code, unused_imports, unused_variables, unused_mut, unused_macros)]
    #[allow(clippy::all)]
    #[allow(rustdoc::invalid_html_tags)]
    mod inner {
        include!(concat!(env!("OUT_DIR"), "/meshtac.rs"));
    }
    pub use inner::*;
}
