//! Lua sandbox creation
//!
//! This module provides a restricted Lua sandbox that prevents access to
//! dangerous operations like filesystem I/O, network access, and process execution.
//!
//! Definition files (pipelines and executor profiles) are plain data, so the
//! sandbox only exposes a small `pipeline` helper module plus the `secret()` and
//! `artifact()` binding constructors.

use mlua::{Lua, LuaOptions, Result as LuaResult, StdLib, Table};

/// Create a restricted Lua sandbox
///
/// This sandbox includes only basic Lua functionality (tables, strings, math)
/// and does NOT include any I/O capabilities or the ability to load external code.
///
/// # Use Cases
/// - CLI: Parse a pipeline file before submitting it to the orchestrator
/// - Orchestrator: Load executor profiles at startup
///
/// # Security
/// This sandbox prevents:
/// - Network access
/// - File system access
/// - Process execution
/// - Loading external modules via require()
///
/// # Example
/// ```no_run
/// use archway_lua::sandbox::create_sandbox;
///
/// let lua = create_sandbox()?;
/// let pipeline_table: mlua::Table = lua
///     .load(r#"return { name = "multiarch", stages = {} }"#)
///     .eval()?;
/// let name: String = pipeline_table.get("name")?;
/// # Ok::<(), mlua::Error>(())
/// ```
pub fn create_sandbox() -> LuaResult<Lua> {
    // Only allow: TABLE, STRING, MATH
    // Explicitly exclude: IO, OS, PACKAGE, DEBUG, COROUTINE
    let lua = unsafe {
        Lua::unsafe_new_with(
            StdLib::TABLE | StdLib::STRING | StdLib::MATH,
            LuaOptions::default(),
        )
    };

    // Remove dangerous globals
    lua.globals().set("require", mlua::Nil)?;
    lua.globals().set("dofile", mlua::Nil)?;
    lua.globals().set("loadfile", mlua::Nil)?;
    lua.globals().set("load", mlua::Nil)?;

    register_binding_helpers(&lua)?;
    register_pipeline_module(&lua)?;

    Ok(lua)
}

/// Register `secret(name)` and `artifact(name)`
///
/// Both return the table form understood by the parser, so
/// `TOKEN = secret("/dockerhub/password")` is the same as
/// `TOKEN = { secret = "/dockerhub/password" }`.
fn register_binding_helpers(lua: &Lua) -> LuaResult<()> {
    let secret_fn = lua.create_function(|lua, name: String| {
        let binding = lua.create_table()?;
        binding.set("secret", name)?;
        Ok(binding)
    })?;
    lua.globals().set("secret", secret_fn)?;

    let artifact_fn = lua.create_function(|lua, name: String| {
        let binding = lua.create_table()?;
        binding.set("artifact", name)?;
        Ok(binding)
    })?;
    lua.globals().set("artifact", artifact_fn)?;

    Ok(())
}

/// Register the pipeline module
///
/// `pipeline.define`, `pipeline.stage` and `pipeline.job` return their table
/// as-is; `pipeline.builder()` offers a fluent alternative.
fn register_pipeline_module(lua: &Lua) -> LuaResult<()> {
    let pipeline = lua.create_table()?;

    let define_fn = lua.create_function(|_, definition: Table| Ok(definition))?;
    pipeline.set("define", define_fn)?;

    let builder_fn = lua.create_function(|lua, ()| create_pipeline_builder(lua))?;
    pipeline.set("builder", builder_fn)?;

    let stage_fn = lua.create_function(|_, config: Table| Ok(config))?;
    pipeline.set("stage", stage_fn)?;

    let job_fn = lua.create_function(|_, config: Table| Ok(config))?;
    pipeline.set("job", job_fn)?;

    lua.globals().set("pipeline", pipeline)?;

    Ok(())
}

/// Create a pipeline builder instance with fluent API methods
fn create_pipeline_builder(lua: &Lua) -> LuaResult<Table> {
    let builder = lua.create_table()?;
    let metatable = lua.create_table()?;

    let name_fn = lua.create_function(|_, (builder, name): (Table, String)| {
        builder.set("_name", name)?;
        Ok(builder)
    })?;
    metatable.set("name", name_fn)?;

    let description_fn = lua.create_function(|_, (builder, desc): (Table, String)| {
        builder.set("_description", desc)?;
        Ok(builder)
    })?;
    metatable.set("description", description_fn)?;

    let stage_fn = lua.create_function(|lua, (builder, stage): (Table, Table)| {
        let stages: Table = match builder.get::<Option<Table>>("_stages")? {
            Some(t) => t,
            None => {
                let t = lua.create_table()?;
                builder.set("_stages", t.clone())?;
                t
            }
        };
        stages.push(stage)?;
        Ok(builder)
    })?;
    metatable.set("stage", stage_fn)?;

    // build() converts builder to pipeline definition table
    let build_fn = lua.create_function(|lua, builder: Table| {
        let definition = lua.create_table()?;

        if let Some(name) = builder.get::<Option<String>>("_name")? {
            definition.set("name", name)?;
        }
        if let Some(desc) = builder.get::<Option<String>>("_description")? {
            definition.set("description", desc)?;
        }
        if let Some(stages) = builder.get::<Option<Table>>("_stages")? {
            definition.set("stages", stages)?;
        }

        Ok(definition)
    })?;
    metatable.set("build", build_fn)?;

    // Set __index to the metatable itself so methods are accessible
    metatable.set("__index", metatable.clone())?;
    builder.set_metatable(Some(metatable))?;

    Ok(builder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandbox_basic_lua() {
        let lua = create_sandbox().unwrap();

        let result: i32 = lua
            .load(
                r#"
                local t = {a = 1, b = 2}
                return t.a + t.b
            "#,
            )
            .eval()
            .unwrap();
        assert_eq!(result, 3);

        let result: String = lua
            .load(r#"return string.format("image@%s", "arm")"#)
            .eval()
            .unwrap();
        assert_eq!(result, "image@arm");
    }

    #[test]
    fn test_sandbox_no_io() {
        let lua = create_sandbox().unwrap();

        let has_io: bool = lua.load(r#"return io ~= nil"#).eval().unwrap();
        assert!(!has_io);

        let has_os: bool = lua.load(r#"return os ~= nil"#).eval().unwrap();
        assert!(!has_os);
    }

    #[test]
    fn test_sandbox_no_require() {
        let lua = create_sandbox().unwrap();

        let result: LuaResult<()> = lua.load(r#"require("os")"#).exec();
        assert!(result.is_err());
    }

    #[test]
    fn test_binding_helpers() {
        let lua = create_sandbox().unwrap();

        let secret: String = lua
            .load(r#"return secret("/dockerhub/password").secret"#)
            .eval()
            .unwrap();
        assert_eq!(secret, "/dockerhub/password");

        let artifact: String = lua
            .load(r#"return artifact("image@arm").artifact"#)
            .eval()
            .unwrap();
        assert_eq!(artifact, "image@arm");
    }

    #[test]
    fn test_pipeline_builder() {
        let lua = create_sandbox().unwrap();

        let definition: Table = lua
            .load(
                r#"
            return pipeline.builder()
                :name("multiarch")
                :stage({ name = "build-arm", jobs = {} })
                :stage({ name = "publish", jobs = {} })
                :build()
        "#,
            )
            .eval()
            .unwrap();

        let name: String = definition.get("name").unwrap();
        assert_eq!(name, "multiarch");

        let stages: Table = definition.get("stages").unwrap();
        assert_eq!(stages.raw_len(), 2);
        let second: Table = stages.get(2).unwrap();
        assert_eq!(second.get::<String>("name").unwrap(), "publish");
    }
}
