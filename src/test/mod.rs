//! Shared fixtures for unit tests.
//!
//! [`SampleWorld`] populates an entity model with three modules: `App` and `Lib` form the
//! compilation group, `External` stays outside of it. [`ScriptedBackend`] is a backend that
//! replays a fixed list of calls instead of reading IL.

use std::sync::Arc;

use crate::{
    codegen::{
        BackendOutput, CallKind, CodegenBackend, CodegenInterface, CodegenRequest, Relocation,
        RelocationKind,
    },
    metadata::{
        entity::{
            EntityId, FieldDesc, MethodDesc, MethodFlags, ModuleIndex, TypeDesc, TypeFlags,
            TypeSystemContext,
        },
        group::CompilationModuleGroup,
        il::{MetadataIlProvider, MethodIr},
        token::{MetadataTable, Token},
    },
    nodes::NodeFactory,
    resolver::TokenResolver,
    Error, Result,
};

/// A small entity model covering every kind of reference the pipeline handles.
pub struct SampleWorld {
    pub type_system: Arc<TypeSystemContext>,
    /// Open group of `app` and `lib`
    pub group: Arc<CompilationModuleGroup>,

    pub app: ModuleIndex,
    pub lib: ModuleIndex,
    pub external: ModuleIndex,

    pub program: EntityId,
    pub main: EntityId,
    pub helper: EntityId,
    pub counter_field: EntityId,

    pub generic_list: EntityId,
    /// `GenericList<LibType>`, a TypeSpec of `app`
    pub list_of_lib_type: EntityId,

    pub base: EntityId,
    pub base_speak: EntityId,
    pub derived: EntityId,
    pub derived_speak: EntityId,
    pub derived_ctor: EntityId,

    pub shape: EntityId,
    pub abstract_method: EntityId,
    pub circle: EntityId,
    pub abstract_impl: EntityId,

    pub locals_signature: EntityId,
    pub locals_blob: &'static [u8],

    pub lib_type: EntityId,
    pub lib_method: EntityId,

    pub external_type: EntityId,
    pub external_method: EntityId,
}

/// Three-level override chain added by [`SampleWorld::add_override_chain`].
///
/// `Figure::Area` is abstract, `Disc::Area` overrides it and `BigDisc::Area` overrides
/// `Disc::Area`. None of the types is sealed.
pub struct OverrideChain {
    pub figure: EntityId,
    pub figure_area: EntityId,
    pub disc: EntityId,
    pub disc_area: EntityId,
    pub big_disc: EntityId,
    pub big_disc_area: EntityId,
}

fn id(module: ModuleIndex, table: MetadataTable, row: u32) -> EntityId {
    EntityId::new(module, Token::from_parts(table, row))
}

impl SampleWorld {
    pub fn new() -> Self {
        use MetadataTable::{Field, MemberRef, MethodDef, StandAloneSig, TypeDef, TypeRef, TypeSpec};

        let ts = TypeSystemContext::new();
        let app = ts.add_module("App", "/sample/App.dll").unwrap();
        let lib = ts.add_module("Lib", "/sample/Lib.dll").unwrap();
        let external = ts.add_module("External", "/sample/External.dll").unwrap();
        let ret = || MethodIr::new(vec![0x2A]);

        let program = id(app, TypeDef, 2);
        let generic_list = id(app, TypeDef, 3);
        let base = id(app, TypeDef, 4);
        let derived = id(app, TypeDef, 5);
        let shape = id(app, TypeDef, 6);
        let circle = id(app, TypeDef, 7);
        let list_of_lib_type = id(app, TypeSpec, 1);
        let lib_type = id(lib, TypeDef, 2);
        let external_type = id(external, TypeDef, 5);

        ts.add_type(TypeDesc::new(program, "App.Program")).unwrap();
        ts.add_type(TypeDesc::new(generic_list, "App.GenericList`1").with_generic_parameters(1))
            .unwrap();
        ts.add_type(TypeDesc::new(base, "App.Base")).unwrap();
        ts.add_type(TypeDesc::new(derived, "App.Derived").with_base(base)).unwrap();
        ts.add_type(TypeDesc::new(shape, "App.Shape").with_flags(TypeFlags::ABSTRACT))
            .unwrap();
        ts.add_type(
            TypeDesc::new(circle, "App.Circle")
                .with_base(shape)
                .with_flags(TypeFlags::SEALED),
        )
        .unwrap();
        ts.add_type(
            TypeDesc::new(list_of_lib_type, "App.GenericList<Lib.LibType>")
                .with_instantiation(generic_list, vec![lib_type]),
        )
        .unwrap();
        ts.add_type(TypeDesc::new(lib_type, "Lib.LibType")).unwrap();
        ts.add_type(TypeDesc::new(external_type, "External.Widget")).unwrap();

        let locals_signature = id(app, StandAloneSig, 1);
        let locals_blob: &'static [u8] = &[0x07, 0x01, 0x08];
        ts.add_signature(locals_signature, locals_blob).unwrap();

        let main = id(app, MethodDef, 1);
        let helper = id(app, MethodDef, 2);
        let base_speak = id(app, MethodDef, 3);
        let derived_speak = id(app, MethodDef, 4);
        let derived_ctor = id(app, MethodDef, 5);
        let abstract_method = id(app, MethodDef, 6);
        let abstract_impl = id(app, MethodDef, 7);
        let lib_method = id(lib, MethodDef, 1);
        let external_method = id(external, MethodDef, 3);

        ts.add_method(
            MethodDesc::new(main, program, "Main")
                .with_flags(MethodFlags::STATIC)
                .with_body(ret().with_locals(locals_signature.token())),
        )
        .unwrap();
        ts.add_method(
            MethodDesc::new(helper, program, "Helper")
                .with_flags(MethodFlags::STATIC)
                .with_body(ret()),
        )
        .unwrap();
        ts.add_method(
            MethodDesc::new(base_speak, base, "Speak")
                .with_flags(MethodFlags::VIRTUAL | MethodFlags::NEW_SLOT)
                .with_body(ret()),
        )
        .unwrap();
        ts.add_method(
            MethodDesc::new(derived_speak, derived, "Speak")
                .overriding(base_speak)
                .with_body(ret()),
        )
        .unwrap();
        ts.add_method(MethodDesc::new(derived_ctor, derived, ".ctor").with_body(ret()))
            .unwrap();
        ts.add_method(
            MethodDesc::new(abstract_method, shape, "Area")
                .with_flags(MethodFlags::VIRTUAL | MethodFlags::ABSTRACT | MethodFlags::NEW_SLOT),
        )
        .unwrap();
        ts.add_method(
            MethodDesc::new(abstract_impl, circle, "Area")
                .overriding(abstract_method)
                .with_body(ret()),
        )
        .unwrap();
        ts.add_method(MethodDesc::new(lib_method, lib_type, "Run").with_body(ret()))
            .unwrap();
        ts.add_method(MethodDesc::new(external_method, external_type, "Spin")).unwrap();

        let counter_field = id(app, Field, 1);
        ts.add_field(FieldDesc::new(counter_field, program, "counter")).unwrap();

        ts.add_reference(app, Token::from_parts(TypeRef, 1), external_type)
            .unwrap();
        ts.add_reference(app, Token::from_parts(MemberRef, 1), external_method)
            .unwrap();

        SampleWorld {
            type_system: Arc::new(ts),
            group: Arc::new(CompilationModuleGroup::new([app, lib])),
            app,
            lib,
            external,
            program,
            main,
            helper,
            counter_field,
            generic_list,
            list_of_lib_type,
            base,
            base_speak,
            derived,
            derived_speak,
            derived_ctor,
            shape,
            abstract_method,
            circle,
            abstract_impl,
            locals_signature,
            locals_blob,
            lib_type,
            lib_method,
            external_type,
            external_method,
        }
    }

    /// Registers [`OverrideChain`] in `app`.
    pub fn add_override_chain(&self) -> OverrideChain {
        use MetadataTable::{MethodDef, TypeDef};

        let ts = &self.type_system;
        let chain = OverrideChain {
            figure: id(self.app, TypeDef, 8),
            figure_area: id(self.app, MethodDef, 8),
            disc: id(self.app, TypeDef, 9),
            disc_area: id(self.app, MethodDef, 9),
            big_disc: id(self.app, TypeDef, 10),
            big_disc_area: id(self.app, MethodDef, 10),
        };

        ts.add_type(TypeDesc::new(chain.figure, "App.Figure").with_flags(TypeFlags::ABSTRACT))
            .unwrap();
        ts.add_type(TypeDesc::new(chain.disc, "App.Disc").with_base(chain.figure))
            .unwrap();
        ts.add_type(TypeDesc::new(chain.big_disc, "App.BigDisc").with_base(chain.disc))
            .unwrap();

        ts.add_method(
            MethodDesc::new(chain.figure_area, chain.figure, "Area")
                .with_flags(MethodFlags::VIRTUAL | MethodFlags::ABSTRACT | MethodFlags::NEW_SLOT),
        )
        .unwrap();
        ts.add_method(
            MethodDesc::new(chain.disc_area, chain.disc, "Area")
                .overriding(chain.figure_area)
                .with_body(MethodIr::new(vec![0x2A])),
        )
        .unwrap();
        ts.add_method(
            MethodDesc::new(chain.big_disc_area, chain.big_disc, "Area")
                .overriding(chain.disc_area)
                .with_body(MethodIr::new(vec![0x2A])),
        )
        .unwrap();

        chain
    }

    /// Closed group of `app` and `lib`
    pub fn closed_group(&self) -> Arc<CompilationModuleGroup> {
        Arc::new(CompilationModuleGroup::closed([self.app, self.lib]))
    }

    /// A node factory over the open group, reading bodies from the entity model
    pub fn factory(&self) -> NodeFactory {
        let resolver = Arc::new(TokenResolver::new(
            self.type_system.clone(),
            self.group.clone(),
        ));
        NodeFactory::new(resolver, Arc::new(MetadataIlProvider))
    }
}

/// Backend which ignores the IL and replays scripted calls.
///
/// Each call is emitted as a `0xE8` opcode followed by a 4-byte relative relocation; the code
/// ends with `0xC3`.
#[derive(Default)]
pub struct ScriptedBackend {
    calls: Vec<(Token, CallKind)>,
    extra: Vec<Relocation>,
    failure: Option<String>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(diagnostic: &str) -> Self {
        ScriptedBackend {
            failure: Some(diagnostic.to_string()),
            ..Self::default()
        }
    }

    pub fn calls(mut self, token: Token, kind: CallKind) -> Self {
        self.calls.push((token, kind));
        self
    }

    pub fn with_extra_relocation(mut self, relocation: Relocation) -> Self {
        self.extra.push(relocation);
        self
    }
}

impl CodegenBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn compile(
        &self,
        _request: &CodegenRequest<'_>,
        interface: &mut dyn CodegenInterface,
    ) -> Result<BackendOutput> {
        if let Some(diagnostic) = &self.failure {
            return Err(Error::BackendFailure(diagnostic.clone()));
        }

        let mut output = BackendOutput::default();
        for (token, kind) in &self.calls {
            let target = interface.call(*token, *kind)?;
            output.code.push(0xE8);
            output.relocations.push(Relocation {
                offset: output.code.len() as u32,
                kind: RelocationKind::Relative32,
                target,
            });
            output.code.extend_from_slice(&[0; 4]);
        }
        output.code.push(0xC3);
        output.relocations.extend(self.extra.iter().copied());

        Ok(output)
    }
}
