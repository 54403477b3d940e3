//! End-to-end tests over the default pipeline and bundled signature lists.

use crash_signature::{
    CrashData, Frame, SignatureGenerator, Thread, SIGNATURE_MAX_LENGTH,
};
use serde_json::json;

fn generator() -> SignatureGenerator {
    SignatureGenerator::new().unwrap()
}

fn thread_with_functions(functions: &[&str]) -> Thread {
    Thread {
        frames: functions
            .iter()
            .map(|f| Frame {
                function: Some(f.to_string()),
                ..Default::default()
            })
            .collect(),
        last_error_value: None,
    }
}

#[test]
fn empty_crash_data() {
    let result = generator().generate(&CrashData::default());
    assert_eq!(result.signature, "EMPTY: no crashing thread identified");
    assert_eq!(result.notes.len(), 1);
    assert!(result.notes[0].contains("no crashing thread"));
}

#[test]
fn generation_is_deterministic() {
    let crash_data = CrashData {
        crashing_thread: Some(0),
        threads: vec![thread_with_functions(&[
            "NtWaitForMultipleObjects",
            "core::panicking::panic",
            "mozilla::dom::Promise::Resolve(JSContext*)",
            "caller()",
        ])],
        abort_message: Some("bad state".to_string()),
        ..Default::default()
    };

    let generator = generator();
    let first = generator.generate(&crash_data);
    let second = generator.generate(&crash_data);
    assert_eq!(first.signature, second.signature);
    assert_eq!(first.notes, second.notes);
    assert_eq!(first.debug_log, second.debug_log);
}

#[test]
fn native_stack_with_irrelevant_and_prefix_frames() {
    let crash_data = CrashData {
        crashing_thread: Some(0),
        threads: vec![thread_with_functions(&[
            // Irrelevant: skipped.
            "NtWaitForMultipleObjects",
            // Prefix: appended, walk continues.
            "core::panicking::panic",
            // Neither: appended, walk stops.
            "mozilla::dom::Promise::Resolve(JSContext*)",
            "not::included()",
        ])],
        ..Default::default()
    };
    let result = generator().generate(&crash_data);
    assert_eq!(
        result.signature,
        "core::panicking::panic | mozilla::dom::Promise::Resolve"
    );
    assert_eq!(
        result.extra["proto_signature"],
        "NtWaitForMultipleObjects | core::panicking::panic | \
         mozilla::dom::Promise::Resolve | not::included"
    );
    let frames = result.extra["normalized_frames"].as_array().unwrap();
    assert_eq!(frames.len(), 4);
    assert_eq!(frames[1], "core::panicking::panic");
}

#[test]
fn java_crash() {
    let crash_data = CrashData {
        java_stack_trace: Some(
            "SomeJavaException: totally made up\n\
             at org.mozilla.lars.myInvention(larsFile.java:666)"
                .to_string(),
        ),
        ..Default::default()
    };
    let result = generator().generate(&crash_data);
    assert_eq!(
        result.signature,
        "SomeJavaException: totally made up at org.mozilla.lars.myInvention(larsFile.java)"
    );
}

#[test]
fn oom_small_boundary() {
    let base = CrashData {
        crashing_thread: Some(0),
        threads: vec![thread_with_functions(&["mozilla::Thing::Grow(int)"])],
        ..Default::default()
    };

    let small = CrashData {
        oom_allocation_size: Some(262_144),
        ..base.clone()
    };
    assert_eq!(generator().generate(&small).signature, "OOM | small");

    let large = CrashData {
        oom_allocation_size: Some(262_145),
        ..base
    };
    assert_eq!(
        generator().generate(&large).signature,
        "OOM | large | mozilla::Thing::Grow"
    );
}

#[test]
fn shutdown_timeout_replaces_signature() {
    let crash_data = CrashData {
        crashing_thread: Some(0),
        threads: vec![thread_with_functions(&["mozilla::Shutdown()"])],
        async_shutdown_timeout: Some(
            r#"{"phase": "profile-before-change", "conditions": [{"name": "B"}, {"name": "A"}]}"#
                .to_string(),
        ),
        ..Default::default()
    };
    let result = generator().generate(&crash_data);
    assert_eq!(
        result.signature,
        "AsyncShutdownTimeout | profile-before-change | A,B"
    );
    // The replaced signature is preserved in the notes.
    assert!(result
        .notes
        .iter()
        .any(|n| n.contains("was: \"mozilla::Shutdown\"")));
}

#[test]
fn shutdown_timeout_malformed_json() {
    let crash_data = CrashData {
        async_shutdown_timeout: Some("{{{{".to_string()),
        ..Default::default()
    };
    let result = generator().generate(&crash_data);
    assert_eq!(result.signature, "AsyncShutdownTimeout | UNKNOWN");
    assert!(result
        .notes
        .iter()
        .any(|n| n.contains("Error parsing AsyncShutdownTimeout")));
}

#[test]
fn shutdown_hang_uses_thread_zero() {
    let crash_data = CrashData {
        crashing_thread: Some(1),
        threads: vec![
            thread_with_functions(&["nsAppShell::ProcessNextNativeEvent(bool)"]),
            thread_with_functions(&["mozilla::(anonymous namespace)::RunWatchdog(void*)"]),
        ],
        ..Default::default()
    };
    let result = generator().generate(&crash_data);
    assert_eq!(
        result.signature,
        "shutdownhang | nsAppShell::ProcessNextNativeEvent"
    );
}

#[test]
fn stackwalker_status_appended_to_empty() {
    let crash_data = CrashData {
        mdsw_status_string: Some("no minidump".to_string()),
        ..Default::default()
    };
    let result = generator().generate(&crash_data);
    assert_eq!(
        result.signature,
        "EMPTY: no crashing thread identified; no minidump"
    );
}

#[test]
fn signature_length_is_capped() {
    // A frame list of very long frames plus a long abort message.
    let long_functions: Vec<String> = (0..3)
        .map(|i| format!("{}{i}(int)", "x".repeat(300)))
        .collect();
    let crash_data = CrashData {
        crashing_thread: Some(0),
        threads: vec![thread_with_functions(
            &long_functions.iter().map(String::as_str).collect::<Vec<_>>(),
        )],
        abort_message: Some("y".repeat(500)),
        ..Default::default()
    };
    let result = generator().generate(&crash_data);
    assert!(result.signature.chars().count() <= SIGNATURE_MAX_LENGTH);
    assert!(result.signature.ends_with("..."));
}

#[test]
fn windows_modules_lowercased_end_to_end() {
    let processed = json!({
        "json_dump": {
            "crash_info": {"crashing_thread": 0},
            "system_info": {"os": "Windows NT"},
            "threads": [{
                "frames": [
                    {"module": "KERNELBASE.dll", "module_offset": "0x000115f6"},
                    {"module": "xul.dll", "module_offset": "0x42"}
                ]
            }]
        }
    });
    let crash_data = CrashData::from_processed_crash(&processed);
    let result = generator().generate(&crash_data);
    // DLL frames have their @offset trimmed in the walk.
    assert_eq!(result.signature, "kernelbase.dll");
    assert_eq!(
        result.extra["proto_signature"],
        "kernelbase.dll@0x115f6 | xul.dll@0x42"
    );
}

#[test]
fn inline_frames_expand_before_their_caller() {
    let processed = json!({
        "json_dump": {
            "crash_info": {"crashing_thread": 0},
            "threads": [{
                "frames": [{
                    "function": "outer(int)",
                    "inlines": [
                        {"function": "innermost()"},
                        {"function": "inner()"}
                    ]
                }]
            }]
        }
    });
    let crash_data = CrashData::from_processed_crash(&processed);
    let result = generator().generate(&crash_data);
    assert_eq!(result.signature, "innermost");
    assert_eq!(
        result.extra["proto_signature"],
        "innermost | inner | outer"
    );
}

#[test]
fn ipc_channel_error_end_to_end() {
    let crash_data = CrashData {
        crashing_thread: Some(0),
        threads: vec![thread_with_functions(&["mozilla::ipc::Thing()"])],
        ipc_channel_error: Some("ShutDownKill".to_string()),
        additional_minidumps: vec!["upload_file_minidump_browser".to_string()],
        ..Default::default()
    };
    let result = generator().generate(&crash_data);
    assert_eq!(result.signature, "IPCError-browser | ShutDownKill");
}

#[test]
fn stack_overflow_end_to_end() {
    let crash_data = CrashData {
        crashing_thread: Some(0),
        threads: vec![thread_with_functions(&["deep::recursion(int)"])],
        reason: Some("EXCEPTION_STACK_OVERFLOW".to_string()),
        ..Default::default()
    };
    let result = generator().generate(&crash_data);
    assert_eq!(result.signature, "stackoverflow | deep::recursion");
}
