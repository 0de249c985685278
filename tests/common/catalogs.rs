//! Hand-written ISF catalogs for synthetic 64-bit kernels.

use memstrata::Catalog;
use serde_json::{json, Value};

fn base_types() -> Value {
    json!({
        "pointer": {"kind": "int", "size": 8, "signed": false, "endian": "little"},
        "void": {"kind": "void", "size": 0, "signed": false, "endian": "little"},
        "char": {"kind": "char", "size": 1, "signed": true, "endian": "little"},
        "unsigned char": {"kind": "char", "size": 1, "signed": false, "endian": "little"},
        "unsigned short": {"kind": "int", "size": 2, "signed": false, "endian": "little"},
        "int": {"kind": "int", "size": 4, "signed": true, "endian": "little"},
        "unsigned int": {"kind": "int", "size": 4, "signed": false, "endian": "little"},
        "long": {"kind": "int", "size": 8, "signed": true, "endian": "little"},
        "long long": {"kind": "int", "size": 8, "signed": true, "endian": "little"},
        "unsigned long long": {"kind": "int", "size": 8, "signed": false, "endian": "little"}
    })
}

fn base(name: &str) -> Value {
    json!({"kind": "base", "name": name})
}

fn ptr(subtype: Value) -> Value {
    json!({"kind": "pointer", "subtype": subtype})
}

fn strukt(name: &str) -> Value {
    json!({"kind": "struct", "name": name})
}

fn chars(count: u64) -> Value {
    json!({"kind": "array", "count": count, "subtype": base("char")})
}

fn field(offset: u64, type_desc: Value) -> Value {
    json!({"offset": offset, "type": type_desc})
}

fn build(user_types: Value, symbols: Value) -> Catalog {
    let doc = json!({
        "metadata": {"format": "6.2.0"},
        "base_types": base_types(),
        "user_types": user_types,
        "enums": {},
        "symbols": symbols
    });
    Catalog::from_json_str(&doc.to_string()).unwrap()
}

/// Windows x64 object manager types, enough for pool scanning.
pub fn windows_types() -> Value {
    json!({
        "_LIST_ENTRY": {"kind": "struct", "size": 16, "fields": {
            "Flink": field(0, ptr(strukt("_LIST_ENTRY"))),
            "Blink": field(8, ptr(strukt("_LIST_ENTRY")))
        }},
        "_UNICODE_STRING": {"kind": "struct", "size": 16, "fields": {
            "Length": field(0, base("unsigned short")),
            "MaximumLength": field(2, base("unsigned short")),
            "Buffer": field(8, ptr(base("unsigned short")))
        }},
        "_POOL_HEADER": {"kind": "struct", "size": 16, "fields": {
            "PreviousSize": field(0, json!({"kind": "bitfield", "bit_position": 0, "bit_length": 8,
                "type": base("unsigned short")})),
            "PoolIndex": field(1, base("unsigned char")),
            "BlockSize": field(2, json!({"kind": "bitfield", "bit_position": 0, "bit_length": 8,
                "type": base("unsigned short")})),
            "PoolType": field(2, json!({"kind": "bitfield", "bit_position": 8, "bit_length": 8,
                "type": base("unsigned short")})),
            "PoolTag": field(4, base("unsigned int")),
            "ProcessBilled": field(8, ptr(base("void")))
        }},
        "_QUAD": {"kind": "union", "size": 8, "fields": {
            "UseThisFieldToCopy": field(0, base("long long"))
        }},
        "_OBJECT_HEADER": {"kind": "struct", "size": 56, "fields": {
            "PointerCount": field(0, base("long long")),
            "HandleCount": field(8, base("long long")),
            "Lock": field(16, ptr(base("void"))),
            "TypeIndex": field(24, base("unsigned char")),
            "TraceFlags": field(25, base("unsigned char")),
            "InfoMask": field(26, base("unsigned char")),
            "Flags": field(27, base("unsigned char")),
            "ObjectCreateInfo": field(32, ptr(base("void"))),
            "SecurityDescriptor": field(40, ptr(base("void"))),
            "Body": field(48, json!({"kind": "union", "name": "_QUAD"}))
        }},
        "_OBJECT_HEADER_CREATOR_INFO": {"kind": "struct", "size": 32, "fields": {
            "TypeList": field(0, strukt("_LIST_ENTRY")),
            "CreatorUniqueProcess": field(16, ptr(base("void")))
        }},
        "_OBJECT_HEADER_NAME_INFO": {"kind": "struct", "size": 32, "fields": {
            "Directory": field(0, ptr(base("void"))),
            "Name": field(8, strukt("_UNICODE_STRING")),
            "ReferenceCount": field(24, base("int"))
        }},
        "_OBJECT_HEADER_HANDLE_INFO": {"kind": "struct", "size": 16, "fields": {
            "HandleCountDataBase": field(0, ptr(base("void")))
        }},
        "_DISPATCHER_HEADER": {"kind": "struct", "size": 24, "fields": {
            "Type": field(0, base("unsigned char")),
            "SignalState": field(4, base("int")),
            "WaitListHead": field(8, strukt("_LIST_ENTRY"))
        }},
        "_KMUTANT": {"kind": "struct", "size": 56, "fields": {
            "Header": field(0, strukt("_DISPATCHER_HEADER")),
            "MutantListEntry": field(24, strukt("_LIST_ENTRY")),
            "OwnerThread": field(40, ptr(base("void"))),
            "Abandoned": field(48, base("unsigned char")),
            "ApcDisable": field(49, base("unsigned char"))
        }}
    })
}

pub fn windows() -> Catalog {
    build(windows_types(), json!({}))
}

/// Linux task and file types. `linux_banner` is linked at 0x1000 and
/// `init_task` at 0x1100.
pub fn linux() -> Catalog {
    let types = json!({
        "list_head": {"kind": "struct", "size": 16, "fields": {
            "next": field(0, ptr(strukt("list_head"))),
            "prev": field(8, ptr(strukt("list_head")))
        }},
        "task_struct": {"kind": "struct", "size": 64, "fields": {
            "state": field(0, base("long")),
            "pid": field(16, base("int")),
            "tgid": field(20, base("int")),
            "tasks": field(24, strukt("list_head")),
            "comm": field(40, chars(16)),
            "files": field(56, ptr(strukt("files_struct")))
        }},
        "files_struct": {"kind": "struct", "size": 16, "fields": {
            "count": field(0, base("int")),
            "fdt": field(8, ptr(strukt("fdtable")))
        }},
        "fdtable": {"kind": "struct", "size": 16, "fields": {
            "max_fds": field(0, base("unsigned int")),
            "fd": field(8, ptr(ptr(strukt("file"))))
        }},
        "path": {"kind": "struct", "size": 16, "fields": {
            "mnt": field(0, ptr(base("void"))),
            "dentry": field(8, ptr(strukt("dentry")))
        }},
        "file": {"kind": "struct", "size": 24, "fields": {
            "f_path": field(0, strukt("path")),
            "f_flags": field(16, base("unsigned int"))
        }},
        "__qstr_hash_len": {"kind": "struct", "size": 8, "fields": {
            "hash": field(0, base("unsigned int")),
            "len": field(4, base("unsigned int"))
        }},
        "qstr": {"kind": "struct", "size": 16, "fields": {
            "__anon_hash_len": {"offset": 0, "type": strukt("__qstr_hash_len"), "anonymous": true},
            "name": field(8, ptr(base("unsigned char")))
        }},
        "dentry": {"kind": "struct", "size": 32, "fields": {
            "d_flags": field(0, base("unsigned int")),
            "d_parent": field(8, ptr(strukt("dentry"))),
            "d_name": field(16, strukt("qstr"))
        }}
    });
    let symbols = json!({
        "linux_banner": {"address": 0x1000, "type": chars(64),
                         "constant_data": "TGludXggdmVyc2lvbiA="},
        "init_task": {"address": 0x1100, "type": strukt("task_struct")}
    });
    build(types, symbols)
}

/// XNU MAC policy and kext types. `_version` is linked at 0x1000,
/// `_mac_policy_list` at 0x1100 and `kmod` at 0x1200.
pub fn mac() -> Catalog {
    let function = json!({"kind": "function"});
    let types = json!({
        "mac_policy_list": {"kind": "struct", "size": 32, "fields": {
            "numloaded": field(0, base("unsigned int")),
            "maxindex": field(4, base("unsigned int")),
            "staticmax": field(8, base("unsigned int")),
            "chunks": field(12, base("unsigned int")),
            "freehint": field(16, base("unsigned int")),
            "entries": field(24, ptr(strukt("mac_policy_list_element")))
        }},
        "mac_policy_list_element": {"kind": "struct", "size": 8, "fields": {
            "mpc": field(0, ptr(strukt("mac_policy_conf")))
        }},
        "mac_policy_conf": {"kind": "struct", "size": 40, "fields": {
            "mpc_name": field(0, ptr(base("char"))),
            "mpc_fullname": field(8, ptr(base("char"))),
            "mpc_labelnames": field(16, ptr(ptr(base("char")))),
            "mpc_labelname_count": field(24, base("unsigned int")),
            "mpc_ops": field(32, ptr(strukt("mac_policy_ops")))
        }},
        "mac_policy_ops": {"kind": "struct", "size": 32, "fields": {
            "mpo_audit_check_postselect": field(0, ptr(function.clone())),
            "mpo_audit_check_preselect": field(8, ptr(function.clone())),
            "mpo_bpfdesc_label_associate": field(16, ptr(function.clone())),
            "mpo_bpfdesc_label_destroy": field(24, ptr(function.clone()))
        }},
        "kmod_info": {"kind": "struct", "size": 200, "fields": {
            "next": field(0, ptr(strukt("kmod_info"))),
            "info_version": field(8, base("int")),
            "id": field(12, base("unsigned int")),
            "name": field(16, chars(64)),
            "version": field(80, chars(64)),
            "reference_count": field(144, base("int")),
            "reference_list": field(152, ptr(base("void"))),
            "address": field(160, base("unsigned long long")),
            "size": field(168, base("unsigned long long")),
            "hdr_size": field(176, base("unsigned long long")),
            "start": field(184, ptr(function.clone())),
            "stop": field(192, ptr(function))
        }}
    });
    let symbols = json!({
        "_version": {"address": 0x1000, "constant_data": "RGFyd2luIEtlcm5lbCBWZXJzaW9uIA=="},
        "_mac_policy_list": {"address": 0x1100},
        "kmod": {"address": 0x1200, "type": ptr(strukt("kmod_info"))}
    });
    build(types, symbols)
}
