use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

fn main() {
    let dest = env::var("OUT_DIR").unwrap();

    // ========================================================================
    // SPIR-V Shader Compilation (via glslc from Vulkan SDK)
    // ========================================================================
    // Targets Vulkan 1.3 with SPIR-V 1.6 for dynamic rendering and
    // synchronization2.
    let shader_dir = Path::new("shaders");
    if !shader_dir.exists() {
        return;
    }

    let glslc = match find_glslc() {
        Some(path) => path,
        None => {
            panic!(
                "glslc not found. Install the Vulkan SDK to compile shaders.\n\
                 Download from: https://vulkan.lunarg.com/sdk/home\n\
                 Ensure VULKAN_SDK is set or glslc is on PATH."
            );
        }
    };

    let spirv_dir = Path::new(&dest).join("spirv");
    fs::create_dir_all(&spirv_dir).unwrap();

    let shaders = [
        "quad.vert.glsl",
        "quad.frag.glsl",
        "mesh.vert.glsl",
        "mesh.frag.glsl",
    ];

    let mut any_failed = false;

    for filename in &shaders {
        let src_path = shader_dir.join(filename);
        let spv_name = filename.replace(".glsl", ".spv");
        let spv_path = spirv_dir.join(&spv_name);

        let stage = if filename.contains(".vert.") {
            "vertex"
        } else {
            "fragment"
        };

        any_failed |= !compile_shader(&glslc, &src_path, &spv_path, stage, filename);
        println!("cargo:rerun-if-changed=shaders/{filename}");
    }

    if any_failed {
        panic!("Some shaders failed to compile (see warnings above)");
    }
}

/// Compile a single shader file to SPIR-V.
fn compile_shader(glslc: &Path, src_path: &Path, spv_path: &Path, stage: &str, filename: &str) -> bool {
    let output = Command::new(glslc)
        .arg(format!("-fshader-stage={stage}"))
        .args(["--target-env=vulkan1.3", "--target-spv=spv1.6", "-O", "-o"])
        .arg(spv_path)
        .arg(src_path)
        .output();

    match output {
        Ok(result) => {
            if result.status.success() {
                let stderr = String::from_utf8_lossy(&result.stderr);
                if !stderr.is_empty() {
                    println!("cargo:warning=glslc {filename}: {stderr}");
                }
                true
            } else {
                let stderr = String::from_utf8_lossy(&result.stderr);
                println!("cargo:warning=glslc FAILED {filename}: {stderr}");
                false
            }
        }
        Err(e) => {
            println!("cargo:warning=glslc: failed to run for {filename}: {e}");
            false
        }
    }
}

/// Find glslc binary: check PATH, then VULKAN_SDK/bin.
fn find_glslc() -> Option<PathBuf> {
    if let Ok(output) = Command::new("glslc").arg("--version").output() {
        if output.status.success() {
            return Some(PathBuf::from("glslc"));
        }
    }

    if let Ok(sdk) = env::var("VULKAN_SDK") {
        let glslc_path = PathBuf::from(&sdk).join("Bin").join("glslc.exe");
        if glslc_path.exists() {
            return Some(glslc_path);
        }
        let glslc_path = PathBuf::from(&sdk).join("bin").join("glslc");
        if glslc_path.exists() {
            return Some(glslc_path);
        }
    }

    None
}
