// FFmpeg argument construction for multi-camera exports
//
// Layout by input count: 1 passthrough, 2 side by side, 3 side by side,
// 4 a 2x2 grid. Every input is trimmed to the requested window before
// compositing.

use std::path::Path;

/// Inputs beyond this count cannot be placed in the grid and are dropped by
/// the engine before it gets here.
pub const MAX_LAYOUT_INPUTS: usize = 4;

pub fn build_export_args(
    inputs: &[&Path],
    start_s: f64,
    duration_s: f64,
    use_gpu: bool,
    output: &Path,
) -> Vec<String> {
    let inputs = &inputs[..inputs.len().min(MAX_LAYOUT_INPUTS)];
    let mut args: Vec<String> = Vec::new();

    for input in inputs {
        args.extend(["-ss".into(), format!("{}", start_s)]);
        args.extend(["-t".into(), format!("{}", duration_s)]);
        if use_gpu {
            args.extend(["-hwaccel".into(), "cuda".into()]);
        }
        args.extend(["-i".into(), input.display().to_string()]);
    }

    if let Some(filter) = layout_filter(inputs.len()) {
        args.extend(["-filter_complex".into(), filter.to_string()]);
        args.extend(["-map".into(), "[v]".into()]);
    }

    if use_gpu {
        args.extend(["-c:v".into(), "h264_nvenc".into()]);
    } else {
        args.extend(["-c:v".into(), "libx264".into()]);
    }
    args.extend(["-preset".into(), "fast".into()]);

    args.push("-y".into());
    args.push(output.display().to_string());
    args
}

fn layout_filter(input_count: usize) -> Option<&'static str> {
    match input_count {
        0 | 1 => None,
        2 => Some("[0:v][1:v]hstack=inputs=2[v]"),
        3 => Some("[0:v][1:v][2:v]hstack=inputs=3[v]"),
        _ => Some("[0:v][1:v][2:v][3:v]xstack=inputs=4:layout=0_0|w0_0|0_h0|w0_h0[v]"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(n: usize) -> Vec<std::path::PathBuf> {
        (0..n)
            .map(|i| std::path::PathBuf::from(format!("/footage/cam{}.mp4", i)))
            .collect()
    }

    fn args_for(n: usize, use_gpu: bool) -> Vec<String> {
        let owned = paths(n);
        let refs: Vec<&Path> = owned.iter().map(|p| p.as_path()).collect();
        build_export_args(&refs, 5.0, 10.0, use_gpu, Path::new("/config/exports/out.mp4"))
    }

    #[test]
    fn single_input_is_passthrough() {
        let args = args_for(1, false);
        assert!(!args.contains(&"-filter_complex".to_string()));
        assert!(args.contains(&"libx264".to_string()));
        assert_eq!(args.iter().filter(|a| *a == "-i").count(), 1);
    }

    #[test]
    fn two_inputs_stack_horizontally() {
        let args = args_for(2, false);
        let filter_pos = args.iter().position(|a| a == "-filter_complex").unwrap();
        assert_eq!(args[filter_pos + 1], "[0:v][1:v]hstack=inputs=2[v]");
        assert!(args.contains(&"[v]".to_string()));
    }

    #[test]
    fn three_inputs_stack_horizontally() {
        let args = args_for(3, false);
        assert!(args.contains(&"[0:v][1:v][2:v]hstack=inputs=3[v]".to_string()));
    }

    #[test]
    fn four_inputs_form_a_grid() {
        let args = args_for(4, false);
        assert!(args.contains(
            &"[0:v][1:v][2:v][3:v]xstack=inputs=4:layout=0_0|w0_0|0_h0|w0_h0[v]".to_string()
        ));
    }

    #[test]
    fn surplus_inputs_are_dropped_to_grid_capacity() {
        let args = args_for(6, false);
        assert_eq!(args.iter().filter(|a| *a == "-i").count(), 4);
    }

    #[test]
    fn every_input_is_trimmed() {
        let args = args_for(2, false);
        assert_eq!(args.iter().filter(|a| *a == "-ss").count(), 2);
        assert_eq!(args.iter().filter(|a| *a == "-t").count(), 2);
        let ss_pos = args.iter().position(|a| a == "-ss").unwrap();
        assert_eq!(args[ss_pos + 1], "5");
    }

    #[test]
    fn gpu_toggles_decoder_and_encoder() {
        let args = args_for(2, true);
        assert!(args.contains(&"-hwaccel".to_string()));
        assert!(args.contains(&"h264_nvenc".to_string()));
        assert!(!args.contains(&"libx264".to_string()));

        let args = args_for(2, false);
        assert!(!args.contains(&"-hwaccel".to_string()));
    }
}
