//! Black-box tests driving `StructureDef`/`parse`/`emit` end to end, the
//! way a user of the crate would build a structure from field values
//! rather than reaching into engine internals.

use binfield_core::context::{ContextHandle, ParsingContext};
use binfield_core::error::BinFieldError;
use binfield_core::field::{
    ArrayField, BitField, BytesField, ByteOrder, EnumField, EnumType, FieldBase, IntegerField, TerminatorHandler,
};
use binfield_core::structure::{emit_bytes, parse_bytes, CheckFn, EngineConfig, NegativeOffsetPolicy, StructureDef};
use binfield_core::thunk::{field, len_, val};
use binfield_core::{Field, Spec, StructureValue, Value};
use std::rc::Rc;

fn bytes_field() -> BytesField {
    BytesField::new()
}

#[test]
fn length_prefixed_payload_round_trips() {
    let def = StructureDef::new(
        "example",
        vec![
            (
                "some_number".to_string(),
                Field::Integer(IntegerField::new(4, ByteOrder::Big, true)),
            ),
            (
                "length".to_string(),
                Field::Integer(IntegerField::new(1, ByteOrder::Big, false)),
            ),
            (
                "data".to_string(),
                Field::Bytes(bytes_field().with_length(Spec::field("length"))),
            ),
        ],
    );

    let input = b"\x01\x02\x03\x04\x0bHello world".to_vec();
    let parsed = parse_bytes(&def, input).unwrap();
    assert_eq!(parsed.get("some_number").unwrap().as_int().unwrap(), 0x01020304);
    assert_eq!(parsed.get("length").unwrap().as_int().unwrap(), 11);
    assert_eq!(parsed.get("data").unwrap().as_bytes().unwrap().as_ref(), b"Hello world");

    // Auto-override: the `length=Integer` field's override was inferred
    // implicitly from `data.length` being a bare `FieldRef("length")`,
    // so emitting the parsed value back reproduces the original bytes.
    let data = StructureValue::new(def.clone())
        .set("some_number", 0x01020304i128)
        .set("data", b"Hello world".to_vec());
    let out = emit_bytes(&def, &data).unwrap();
    assert_eq!(out, b"\x01\x02\x03\x04\x0bHello world");
}

#[test]
fn auto_override_computes_length_from_unset_sibling() {
    let def = StructureDef::new(
        "example",
        vec![
            (
                "some_number".to_string(),
                Field::Integer(IntegerField::new(4, ByteOrder::Big, true)),
            ),
            (
                "length".to_string(),
                Field::Integer(IntegerField::new(1, ByteOrder::Big, false)),
            ),
            (
                "data".to_string(),
                Field::Bytes(bytes_field().with_length(Spec::field("length"))),
            ),
        ],
    );

    let value = StructureValue::new(def.clone()).set("data", b"How are you doing?".to_vec());
    let out = emit_bytes(&def, &value).unwrap();
    assert_eq!(out, b"\x00\x00\x00\x00\x12How are you doing?");
}

#[test]
fn auto_override_is_overridden_by_an_explicit_value() {
    let def = StructureDef::new(
        "example",
        vec![
            (
                "length".to_string(),
                Field::Integer(IntegerField::new(1, ByteOrder::Big, false)),
            ),
            (
                "content".to_string(),
                Field::Bytes(bytes_field().with_length(Spec::field("length"))),
            ),
        ],
    );

    let without_length = StructureValue::new(def.clone()).set("content", b"123456".to_vec());
    assert_eq!(emit_bytes(&def, &without_length).unwrap(), b"\x06123456");

    let with_length = StructureValue::new(def.clone())
        .set("length", 1i128)
        .set("content", b"123456".to_vec());
    assert_eq!(emit_bytes(&def, &with_length).unwrap(), b"\x01123456");
}

#[test]
fn explicit_override_expression_derives_length_from_a_later_field() {
    // `length`'s override is an explicit thunk (not the auto-override
    // inference, which only fires for a *bare* field reference) computing
    // `len_(content) + 4`; `content`'s own length is the symmetric
    // `length - 4`.
    let length = {
        let mut f = IntegerField::new(4, ByteOrder::Big, false);
        f.base = f.base.with_override(Spec::expr(len_(field("content")) + val(4i128)));
        Field::Integer(f)
    };
    let content = Field::Bytes(bytes_field().with_length(Spec::expr(field("length") - val(4i128))));

    let def = StructureDef::new("framed", vec![("length".to_string(), length), ("content".to_string(), content)]);

    let value = StructureValue::new(def.clone()).set("content", b"hi".to_vec());
    let out = emit_bytes(&def, &value).unwrap();
    assert_eq!(out, b"\x00\x00\x00\x06hi");

    let parsed = parse_bytes(&def, out).unwrap();
    assert_eq!(parsed.get("content").unwrap().as_bytes().unwrap().as_ref(), b"hi");
    assert_eq!(parsed.get("length").unwrap().as_int().unwrap(), 6);
}

#[test]
fn consecutive_terminated_fields_split_on_distinct_terminators() {
    let def = StructureDef::new(
        "lines",
        vec![
            ("foo".to_string(), Field::Bytes(BytesField::terminated(Some(vec![0])))),
            (
                "bar".to_string(),
                Field::Bytes(BytesField::terminated(Some(b"\r\n".to_vec()))),
            ),
        ],
    );

    let parsed = parse_bytes(&def, b"hello\0world\r\n".to_vec()).unwrap();
    assert_eq!(parsed.get("foo").unwrap().as_bytes().unwrap().as_ref(), b"hello");
    assert_eq!(parsed.get("bar").unwrap().as_bytes().unwrap().as_ref(), b"world");
}

#[test]
fn array_with_count_ref_parses_terminated_elements() {
    let elem = Rc::new(Field::Bytes(BytesField::terminated(Some(vec![0]))));
    let def = StructureDef::new(
        "list",
        vec![
            ("count".to_string(), Field::Integer(IntegerField::new(1, ByteOrder::Big, false))),
            ("foo".to_string(), Field::Array(ArrayField::with_count(elem, Spec::field("count")))),
        ],
    );

    let parsed = parse_bytes(&def, b"\x02hello\0world\0".to_vec()).unwrap();
    let items = parsed.get("foo").unwrap().as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_bytes().unwrap().as_ref(), b"hello");
    assert_eq!(items[1].as_bytes().unwrap().as_ref(), b"world");
}

#[test]
fn array_auto_override_counts_elements_on_emit() {
    let elem = Rc::new(Field::Bytes(BytesField::terminated(Some(vec![0]))));
    let def = StructureDef::new(
        "list",
        vec![
            ("count".to_string(), Field::Integer(IntegerField::new(1, ByteOrder::Big, false))),
            ("foo".to_string(), Field::Array(ArrayField::with_count(elem, Spec::field("count")))),
        ],
    );

    let value = StructureValue::new(def.clone()).set(
        "foo",
        Value::Array(vec![Value::Bytes(b"a".to_vec().into()), Value::Bytes(b"bc".to_vec().into())]),
    );
    let out = emit_bytes(&def, &value).unwrap();
    assert_eq!(out, b"\x02a\0bc\0");
}

#[test]
fn bitflag_enum_decodes_a_combination() {
    let base = Rc::new(Field::Integer(IntegerField::new(1, ByteOrder::Big, false)));
    let enum_type = EnumType::Flags(vec![("R".to_string(), 4), ("W".to_string(), 2), ("X".to_string(), 1)]);
    let def = StructureDef::new(
        "perm",
        vec![("perms".to_string(), Field::Enum(EnumField::new(base, enum_type)))],
    );

    let parsed = parse_bytes(&def, vec![0x05]).unwrap();
    let perms = match parsed.get("perms").unwrap() {
        Value::Enum(e) => e,
        other => panic!("expected an enum value, got {other:?}"),
    };
    assert_eq!(perms.raw, 5);
    assert_eq!(perms.flags, vec!["R".to_string(), "X".to_string()]);
}

#[test]
fn forward_reference_resolves_a_lazy_trailing_length() {
    // `content`'s length references `n`, which is declared *after* it but
    // carries a constant negative offset — the pre-population pass must
    // make `n`'s lazy value available before `content` is parsed.
    let mut n = IntegerField::new(1, ByteOrder::Big, false);
    n.base = n.base.with_offset(Value::Int(-1)).make_lazy();

    let def = StructureDef::new(
        "forward_ref",
        vec![
            ("content".to_string(), Field::Bytes(bytes_field().with_length(Spec::field("n")))),
            ("n".to_string(), Field::Integer(n)),
        ],
    );

    let parsed = parse_bytes(&def, b"blahblah\x04".to_vec()).unwrap();
    assert_eq!(parsed.get("content").unwrap().as_bytes().unwrap().as_ref(), b"blah");
    assert_eq!(parsed.get("n").unwrap().as_int().unwrap(), 4);
}

#[test]
fn forward_referenced_field_does_not_disturb_the_sequential_cursor_for_later_fields() {
    // `n` sits between `content` and `tail` in declaration order but is
    // addressed by a constant absolute offset at the very end of the
    // stream. Resolving it (forced transparently while `content` reads its
    // length) must not leave the shared stream cursor parked at `n`'s
    // offset once the main pass reaches it — `tail` still needs to read
    // from wherever `content` left the cursor.
    let mut n = IntegerField::new(1, ByteOrder::Big, false);
    n.base = n.base.with_offset(Value::Int(-1)).make_lazy();

    let def = StructureDef::new(
        "forward_ref_mid",
        vec![
            ("content".to_string(), Field::Bytes(bytes_field().with_length(Spec::field("n")))),
            ("n".to_string(), Field::Integer(n)),
            ("tail".to_string(), Field::Bytes(bytes_field().with_length(Value::Int(2)))),
        ],
    );

    let parsed = parse_bytes(&def, b"blahXY\x04".to_vec()).unwrap();
    assert_eq!(parsed.get("content").unwrap().as_bytes().unwrap().as_ref(), b"blah");
    assert_eq!(parsed.get("tail").unwrap().as_bytes().unwrap().as_ref(), b"XY");
    assert_eq!(parsed.get("n").unwrap().as_int().unwrap(), 4);
}

#[test]
fn lazy_field_equivalent_to_eager_parse() {
    let eager_def = StructureDef::new(
        "plain",
        vec![("value".to_string(), Field::Integer(IntegerField::new(4, ByteOrder::Big, false)))],
    );
    let eager = parse_bytes(&eager_def, b"\x00\x00\x01\x00extra".to_vec()).unwrap();

    let mut lazy_field = IntegerField::new(4, ByteOrder::Big, false);
    lazy_field.base = lazy_field.base.make_lazy();
    let lazy_def = StructureDef::new("lazy", vec![("value".to_string(), Field::Integer(lazy_field))]);
    let lazy = parse_bytes(&lazy_def, b"\x00\x00\x01\x00extra".to_vec()).unwrap();

    assert_eq!(eager.get("value"), lazy.get("value"));
}

#[test]
fn constant_field_rejects_a_mismatched_magic() {
    let def = StructureDef::new(
        "magic",
        vec![("magic".to_string(), Field::Constant(binfield_core::field::ConstantField::new(Value::Bytes(b"PK\x03\x04".to_vec().into()), None).unwrap()))],
    );

    assert!(parse_bytes(&def, b"PK\x03\x04".to_vec()).is_ok());
    assert!(parse_bytes(&def, b"NOPE".to_vec()).is_err());
}

#[test]
fn bit_fields_cross_a_byte_boundary_and_realign() {
    let def = StructureDef::new(
        "flags",
        vec![
            ("a".to_string(), Field::Bit(BitField::new(3))),
            ("b".to_string(), Field::Bit(BitField::new(5).with_realign(true))),
            ("c".to_string(), Field::Integer(IntegerField::new(1, ByteOrder::Big, false))),
        ],
    );

    // 0b101_01010 -> a=0b101=5, b=0b01010=10, then a plain byte follows.
    let parsed = parse_bytes(&def, vec![0b1010_1010, 0xff]).unwrap();
    assert_eq!(parsed.get("a").unwrap().as_int().unwrap(), 0b101);
    assert_eq!(parsed.get("b").unwrap().as_int().unwrap(), 0b01010);
    assert_eq!(parsed.get("c").unwrap().as_int().unwrap(), 0xff);
}

#[test]
fn misaligned_bit_run_into_a_byte_field_is_rejected() {
    let def = StructureDef::new(
        "bad",
        vec![
            ("a".to_string(), Field::Bit(BitField::new(3))),
            ("b".to_string(), Field::Integer(IntegerField::new(1, ByteOrder::Big, false))),
        ],
    );
    assert!(parse_bytes(&def, vec![0xff, 0xff]).is_err());
}

#[test]
fn terminator_until_handler_leaves_terminator_for_the_next_field() {
    let def = StructureDef::new(
        "peek",
        vec![
            (
                "foo".to_string(),
                Field::Bytes(
                    bytes_field()
                        .with_terminator(b"\0".to_vec()),
                ),
            ),
        ],
    );
    let parsed = parse_bytes(&def, b"abc\0".to_vec()).unwrap();
    assert_eq!(parsed.get("foo").unwrap().as_bytes().unwrap().as_ref(), b"abc");

    // `Until` handler: same terminator, but the stream is left positioned
    // at the terminator rather than past it.
    let mut until_field = bytes_field();
    until_field.terminator = Some(vec![0]);
    until_field.terminator_handler = TerminatorHandler::Until;
    let def2 = StructureDef::new(
        "peek2",
        vec![
            ("foo".to_string(), Field::Bytes(until_field)),
            ("rest".to_string(), Field::Bytes(bytes_field().with_length(Value::Int(2)))),
        ],
    );
    let parsed2 = parse_bytes(&def2, b"abc\0x".to_vec()).unwrap();
    assert_eq!(parsed2.get("foo").unwrap().as_bytes().unwrap().as_ref(), b"abc");
    assert_eq!(parsed2.get("rest").unwrap().as_bytes().unwrap().as_ref(), b"\0x");
}

#[test]
fn empty_stream_fails_a_required_field_with_stream_exhausted() {
    let def = StructureDef::new(
        "one_field",
        vec![("n".to_string(), Field::Integer(IntegerField::new(4, ByteOrder::Big, false)))],
    );
    assert!(parse_bytes(&def, Vec::new()).is_err());
}

#[test]
fn alignment_pads_to_the_next_multiple_before_the_next_field() {
    let _ = env_logger::try_init();

    let def = StructureDef::new(
        "aligned",
        vec![
            ("flag".to_string(), Field::Integer(IntegerField::new(1, ByteOrder::Big, false))),
            ("value".to_string(), Field::Integer(IntegerField::new(4, ByteOrder::Big, false))),
        ],
    )
    .with_alignment(4);

    let input = vec![0xaa, 0, 0, 0, 0x00, 0x00, 0x01, 0x00];
    let parsed = parse_bytes(&def, input).unwrap();
    assert_eq!(parsed.get("flag").unwrap().as_int().unwrap(), 0xaa);
    assert_eq!(parsed.get("value").unwrap().as_int().unwrap(), 0x100);
}

#[test]
fn a_failing_post_parse_check_surfaces_as_a_check_error() {
    let _ = env_logger::try_init();

    let check: CheckFn = Rc::new(|ctx: &ContextHandle| {
        let v = ParsingContext::lookup(ctx, "value")?;
        if v.as_int()? == 0 {
            Err(BinFieldError::check_error("value", None, "value must be non-zero"))
        } else {
            Ok(())
        }
    });
    let def = StructureDef::new(
        "checked",
        vec![("value".to_string(), Field::Integer(IntegerField::new(1, ByteOrder::Big, false)))],
    )
    .with_check("non_zero", check);

    assert!(parse_bytes(&def, vec![0]).is_err());
    assert!(parse_bytes(&def, vec![1]).is_ok());
}

#[test]
fn negative_offset_field_writes_back_from_the_declared_length() {
    let tail = Field::Integer(IntegerField {
        base: FieldBase::default().with_offset(Value::Int(-1)),
        ..IntegerField::new(1, ByteOrder::Big, false)
    });
    let def = StructureDef::new(
        "fixed",
        vec![
            ("head".to_string(), Field::Integer(IntegerField::new(1, ByteOrder::Big, false))),
            ("tail".to_string(), tail),
        ],
    )
    .with_length(Value::Int(4));

    let value = StructureValue::new(def.clone()).set("head", 0xaai128).set("tail", 0xffi128);
    let encoded = emit_bytes(&def, &value).unwrap();
    assert_eq!(encoded.len(), 4);
    assert_eq!(encoded[3], 0xff);
}

#[test]
fn negative_offset_field_is_rejected_under_reject_always_policy() {
    let tail = Field::Integer(IntegerField {
        base: FieldBase::default().with_offset(Value::Int(-1)),
        ..IntegerField::new(1, ByteOrder::Big, false)
    });
    let def = StructureDef::new(
        "fixed",
        vec![
            ("head".to_string(), Field::Integer(IntegerField::new(1, ByteOrder::Big, false))),
            ("tail".to_string(), tail),
        ],
    )
    .with_length(Value::Int(4))
    .with_config(EngineConfig {
        negative_offset_policy: NegativeOffsetPolicy::RejectAlways,
    });

    let value = StructureValue::new(def.clone()).set("head", 0xaai128).set("tail", 0xffi128);
    assert!(emit_bytes(&def, &value).is_err());
}

#[test]
fn negative_offset_field_is_rejected_when_length_is_not_statically_known() {
    let tail = Field::Integer(IntegerField {
        base: FieldBase::default().with_offset(Value::Int(-1)),
        ..IntegerField::new(1, ByteOrder::Big, false)
    });
    let def = StructureDef::new(
        "unbounded",
        vec![
            ("body".to_string(), Field::Bytes(BytesField::terminated(None))),
            ("tail".to_string(), tail),
        ],
    );

    let value = StructureValue::new(def.clone())
        .set("body", b"hi".to_vec())
        .set("tail", 0xffi128);
    assert!(emit_bytes(&def, &value).is_err());
}

#[test]
fn negative_length_array_absorbs_trailing_exhaustion() {
    let elem = Rc::new(Field::Integer(IntegerField::new(1, ByteOrder::Big, false)));
    let def = StructureDef::new(
        "tail",
        vec![("items".to_string(), Field::Array(ArrayField::with_length(elem, Value::Int(-1))))],
    );
    let parsed = parse_bytes(&def, vec![1, 2, 3]).unwrap();
    let items = parsed.get("items").unwrap().as_array().unwrap();
    assert_eq!(items.len(), 3);
}

#[test]
fn array_length_auto_override_sums_encoded_bytes_not_element_count() {
    // `items` is `length`-moded (not `count`-moded), so the auto-override
    // installed on `byte_len` must be the array's total *encoded byte*
    // length (3 elements * 2 bytes each = 6), not the element count (3).
    let elem = Rc::new(Field::Integer(IntegerField::new(2, ByteOrder::Big, false)));
    let def = StructureDef::new(
        "framed_list",
        vec![
            ("byte_len".to_string(), Field::Integer(IntegerField::new(1, ByteOrder::Big, false))),
            ("items".to_string(), Field::Array(ArrayField::with_length(elem, Spec::field("byte_len")))),
        ],
    );

    let value = StructureValue::new(def.clone()).set(
        "items",
        Value::Array(vec![Value::Int(1), Value::Int(2), Value::Int(3)]),
    );
    let out = emit_bytes(&def, &value).unwrap();
    assert_eq!(out, b"\x06\x00\x01\x00\x02\x00\x03");
}

#[test]
fn field_declaring_both_offset_and_skip_is_rejected() {
    let bad = Field::Integer(IntegerField {
        base: FieldBase::default().with_offset(Value::Int(0)).with_skip(Value::Int(1)),
        ..IntegerField::new(1, ByteOrder::Big, false)
    });
    let def = StructureDef::new(
        "bad",
        vec![
            ("head".to_string(), Field::Integer(IntegerField::new(1, ByteOrder::Big, false))),
            ("tail".to_string(), bad),
        ],
    );

    assert!(parse_bytes(&def, vec![0, 1, 2]).is_err());
}

#[test]
fn terminator_scan_checks_step_aligned_offsets_not_the_trailing_window() {
    // `step=4`, 2-byte terminator, terminator truly at byte offset 4. A
    // trailing-window check (positions 2-3, then 6-7) would never examine
    // offset 4-5 and overrun straight past the real terminator.
    let foo = Field::Bytes(BytesField {
        step: 4,
        ..BytesField::terminated(Some(vec![0xff, 0xff]))
    });
    let def = StructureDef::new("stepped", vec![("foo".to_string(), foo)]);

    let input = b"\x01\x02\x03\x04\xff\xff\x05\x06".to_vec();
    let parsed = parse_bytes(&def, input).unwrap();
    assert_eq!(
        parsed.get("foo").unwrap().as_bytes().unwrap().as_ref(),
        b"\x01\x02\x03\x04"
    );
}
