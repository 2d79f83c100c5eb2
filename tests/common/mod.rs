//! Shared helpers for the integration tests.
//!
//! [`IlBackend`] is a minimal code generator for a handful of CIL opcodes. It does not produce
//! real machine code; every token-carrying instruction becomes an opcode byte followed by a
//! relocation slot, which is enough to drive the pipeline end to end.

#![allow(dead_code)]

use std::sync::Arc;

use aotgraph::prelude::*;

/// CIL opcodes understood by [`IlBackend`]
pub mod opcodes {
    pub const NOP: u8 = 0x00;
    pub const CALL: u8 = 0x28;
    pub const RET: u8 = 0x2A;
    pub const CALLVIRT: u8 = 0x6F;
    pub const NEWOBJ: u8 = 0x73;
    pub const LDFLD: u8 = 0x7B;
    pub const BOX: u8 = 0x8C;
    pub const LDTOKEN: u8 = 0xD0;
}

/// Initializes logging once per test binary.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Fluent writer for method bodies.
#[derive(Default)]
pub struct Il(Vec<u8>);

impl Il {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_token(mut self, opcode: u8, token: Token) -> Self {
        self.0.push(opcode);
        self.0.extend_from_slice(&token.value().to_le_bytes());
        self
    }

    pub fn nop(mut self) -> Self {
        self.0.push(opcodes::NOP);
        self
    }

    pub fn call(self, token: Token) -> Self {
        self.with_token(opcodes::CALL, token)
    }

    pub fn callvirt(self, token: Token) -> Self {
        self.with_token(opcodes::CALLVIRT, token)
    }

    pub fn newobj(self, token: Token) -> Self {
        self.with_token(opcodes::NEWOBJ, token)
    }

    pub fn ldfld(self, token: Token) -> Self {
        self.with_token(opcodes::LDFLD, token)
    }

    pub fn box_value(self, token: Token) -> Self {
        self.with_token(opcodes::BOX, token)
    }

    pub fn ldtoken(self, token: Token) -> Self {
        self.with_token(opcodes::LDTOKEN, token)
    }

    pub fn raw(mut self, byte: u8) -> Self {
        self.0.push(byte);
        self
    }

    pub fn ret(mut self) -> MethodIr {
        self.0.push(opcodes::RET);
        MethodIr::new(self.0)
    }
}

/// Scans CIL and asks the codegen interface for every referenced entity.
pub struct IlBackend;

impl IlBackend {
    fn read_token(code: &[u8], offset: usize) -> Result<Token> {
        let bytes = code
            .get(offset..offset + 4)
            .ok_or_else(|| Error::BackendFailure(format!("truncated token at offset {offset}")))?;
        Ok(Token::new(u32::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3],
        ])))
    }
}

impl CodegenBackend for IlBackend {
    fn name(&self) -> &str {
        "il-scan"
    }

    fn compile(
        &self,
        request: &CodegenRequest<'_>,
        interface: &mut dyn CodegenInterface,
    ) -> Result<BackendOutput> {
        let code = &request.ir.code;
        let mut output = BackendOutput::default();
        let mut offset = 0;

        while offset < code.len() {
            let opcode = code[offset];
            offset += 1;

            let (native, kind, target) = match opcode {
                opcodes::NOP => {
                    output.code.push(0x90);
                    continue;
                }
                opcodes::RET => {
                    output.code.push(0xC3);
                    continue;
                }
                opcodes::CALL | opcodes::CALLVIRT => {
                    let token = Self::read_token(code, offset)?;
                    let call = if opcode == opcodes::CALL {
                        CallKind::Direct
                    } else {
                        CallKind::Virtual
                    };
                    (0xE8, RelocationKind::Relative32, interface.call(token, call)?)
                }
                opcodes::NEWOBJ => {
                    let token = Self::read_token(code, offset)?;
                    (0xB8, RelocationKind::Absolute64, interface.new_object(token)?)
                }
                opcodes::LDFLD => {
                    let token = Self::read_token(code, offset)?;
                    (0x8B, RelocationKind::Absolute64, interface.field(token)?)
                }
                opcodes::BOX => {
                    let token = Self::read_token(code, offset)?;
                    interface.helper(ReadyToRunHelper::Box);
                    (0xB9, RelocationKind::Absolute64, interface.type_handle(token)?)
                }
                opcodes::LDTOKEN => {
                    let token = Self::read_token(code, offset)?;
                    (0xBA, RelocationKind::Absolute64, interface.resolve_token(token)?)
                }
                other => {
                    return Err(Error::BackendFailure(format!(
                        "unsupported opcode 0x{other:02X} at offset {}",
                        offset - 1
                    )))
                }
            };
            offset += 4;

            output.code.push(native);
            output.relocations.push(Relocation {
                offset: output.code.len() as u32,
                kind,
                target,
            });
            output.code.resize(output.code.len() + kind.size(), 0);
        }

        Ok(output)
    }
}

pub fn def(module: ModuleIndex, table: MetadataTable, row: u32) -> EntityId {
    EntityId::new(module, Token::from_parts(table, row))
}

/// A two-module application plus an external library.
///
/// - `App.Program::Main` calls `App.Program::Helper`, allocates `App.Dog` and calls
///   `App.Animal::Speak` virtually
/// - `App.Program::Helper` takes the token of `Lib.Config`, calls `Lib.Config::Load` and reads
///   `App.Program::count`
/// - `App.Program::Log` calls `External.Console::Write` through a MemberRef
/// - `App.Program::Pet` calls `App.Cat::Speak` virtually
/// - `App.Dog` overrides `App.Animal::Speak`, the sealed `App.Cat` overrides it too
pub struct Application {
    pub type_system: Arc<TypeSystemContext>,
    pub app: ModuleIndex,
    pub lib: ModuleIndex,
    pub external: ModuleIndex,

    pub program: EntityId,
    pub main: EntityId,
    pub helper: EntityId,
    pub log: EntityId,
    pub pet: EntityId,
    pub count: EntityId,

    pub animal: EntityId,
    pub animal_speak: EntityId,
    pub dog: EntityId,
    pub dog_ctor: EntityId,
    pub dog_speak: EntityId,
    pub cat: EntityId,
    pub cat_speak: EntityId,

    pub config: EntityId,
    pub config_load: EntityId,

    pub console: EntityId,
    pub console_write: EntityId,
    pub console_ref: Token,
    pub write_ref: Token,
}

pub const APP_PATH: &str = "/build/App.dll";

impl Application {
    pub fn new() -> Result<Self> {
        use MetadataTable::{Field, MemberRef, MethodDef, TypeDef, TypeRef};

        let ts = TypeSystemContext::new();
        let app = ts.add_module("App", APP_PATH)?;
        let lib = ts.add_module("Lib", "/build/Lib.dll")?;
        let external = ts.add_module("External", "/sdk/External.dll")?;

        let program = def(app, TypeDef, 2);
        let animal = def(app, TypeDef, 3);
        let dog = def(app, TypeDef, 4);
        let cat = def(app, TypeDef, 5);
        let config = def(lib, TypeDef, 2);
        let console = def(external, TypeDef, 7);

        ts.add_type(TypeDesc::new(program, "App.Program"))?;
        ts.add_type(TypeDesc::new(animal, "App.Animal").with_flags(TypeFlags::ABSTRACT))?;
        ts.add_type(TypeDesc::new(dog, "App.Dog").with_base(animal))?;
        ts.add_type(
            TypeDesc::new(cat, "App.Cat")
                .with_base(animal)
                .with_flags(TypeFlags::SEALED),
        )?;
        ts.add_type(TypeDesc::new(config, "Lib.Config").with_flags(TypeFlags::SEALED))?;
        ts.add_type(TypeDesc::new(console, "External.Console"))?;

        let count = def(app, Field, 1);
        ts.add_field(FieldDesc::new(count, program, "count"))?;

        let main = def(app, MethodDef, 1);
        let helper = def(app, MethodDef, 2);
        let log = def(app, MethodDef, 3);
        let animal_speak = def(app, MethodDef, 4);
        let dog_ctor = def(app, MethodDef, 5);
        let dog_speak = def(app, MethodDef, 6);
        let cat_speak = def(app, MethodDef, 7);
        let pet = def(app, MethodDef, 8);
        let config_load = def(lib, MethodDef, 1);
        let console_write = def(external, MethodDef, 9);

        let console_ref = Token::from_parts(TypeRef, 1);
        let write_ref = Token::from_parts(MemberRef, 1);
        let config_ref = Token::from_parts(TypeRef, 2);
        let load_ref = Token::from_parts(MemberRef, 2);
        ts.add_reference(app, console_ref, console)?;
        ts.add_reference(app, write_ref, console_write)?;
        ts.add_reference(app, config_ref, config)?;
        ts.add_reference(app, load_ref, config_load)?;
        // Lib refers to App.Program through its own reference row
        ts.add_reference(lib, Token::from_parts(TypeRef, 1), program)?;

        ts.add_method(
            MethodDesc::new(main, program, "Main")
                .with_flags(MethodFlags::STATIC)
                .with_body(
                    Il::new()
                        .call(helper.token())
                        .newobj(dog_ctor.token())
                        .callvirt(animal_speak.token())
                        .ret(),
                ),
        )?;
        ts.add_method(
            MethodDesc::new(helper, program, "Helper")
                .with_flags(MethodFlags::STATIC)
                .with_body(
                    Il::new()
                        .ldtoken(config_ref)
                        .call(load_ref)
                        .ldfld(count.token())
                        .ret(),
                ),
        )?;
        ts.add_method(
            MethodDesc::new(log, program, "Log")
                .with_flags(MethodFlags::STATIC)
                .with_body(Il::new().ldtoken(console_ref).call(write_ref).ret()),
        )?;
        ts.add_method(
            MethodDesc::new(pet, program, "Pet")
                .with_flags(MethodFlags::STATIC)
                .with_body(Il::new().callvirt(cat_speak.token()).ret()),
        )?;
        ts.add_method(
            MethodDesc::new(animal_speak, animal, "Speak")
                .with_flags(MethodFlags::VIRTUAL | MethodFlags::ABSTRACT | MethodFlags::NEW_SLOT),
        )?;
        ts.add_method(MethodDesc::new(dog_ctor, dog, ".ctor").with_body(Il::new().nop().ret()))?;
        ts.add_method(
            MethodDesc::new(dog_speak, dog, "Speak")
                .overriding(animal_speak)
                .with_body(Il::new().ret()),
        )?;
        ts.add_method(
            MethodDesc::new(cat_speak, cat, "Speak")
                .overriding(animal_speak)
                .with_body(Il::new().ret()),
        )?;
        ts.add_method(
            MethodDesc::new(config_load, config, "Load")
                .with_flags(MethodFlags::STATIC)
                .with_body(Il::new().ret()),
        )?;
        ts.add_method(MethodDesc::new(console_write, console, "Write").with_flags(MethodFlags::STATIC))?;

        Ok(Application {
            type_system: Arc::new(ts),
            app,
            lib,
            external,
            program,
            main,
            helper,
            log,
            pet,
            count,
            animal,
            animal_speak,
            dog,
            dog_ctor,
            dog_speak,
            cat,
            cat_speak,
            config,
            config_load,
            console,
            console_write,
            console_ref,
            write_ref,
        })
    }

    /// Open group of `App` and `Lib`
    pub fn group(&self) -> CompilationModuleGroup {
        CompilationModuleGroup::new([self.app, self.lib])
    }

    /// Closed group of `App` and `Lib`
    pub fn closed_group(&self) -> CompilationModuleGroup {
        CompilationModuleGroup::closed([self.app, self.lib])
    }

    pub fn builder(&self, group: CompilationModuleGroup) -> CompilationBuilder {
        CompilationBuilder::new(self.type_system.clone(), group, APP_PATH)
            .use_backend(Arc::new(IlBackend))
    }
}

