//! A dedicated thread owning an OCR engine that cannot leave it.
//!
//! The pure-onnx-ocr engine caches plans in `RefCell`s, so it is neither
//! `Send` nor `Sync`. The engine is built on the worker thread and pages are
//! sent to it over a channel; callers on any thread block on the reply.

use std::sync::mpsc;
use std::thread;

use image::DynamicImage;
use tracing::debug;

use crate::error::OcrError;

use super::TextBox;

struct Job {
    image: DynamicImage,
    reply: mpsc::Sender<Result<Vec<TextBox>, OcrError>>,
}

/// Handle to the OCR thread. Dropping it stops the thread.
pub(crate) struct OcrWorker {
    jobs: mpsc::Sender<Job>,
}

impl OcrWorker {
    /// Start the thread, build the engine there and wait until it is ready.
    ///
    /// A `build` error is returned here and the thread exits.
    pub(crate) fn spawn<E, B, R>(name: &str, build: B, run: R) -> Result<Self, OcrError>
    where
        E: 'static,
        B: FnOnce() -> Result<E, OcrError> + Send + 'static,
        R: Fn(&E, &DynamicImage) -> Result<Vec<TextBox>, OcrError> + Send + 'static,
    {
        let (jobs, queue) = mpsc::channel::<Job>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), OcrError>>();

        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let engine = match build() {
                    Ok(engine) => {
                        let _ = ready_tx.send(Ok(()));
                        engine
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                for job in queue {
                    let _ = job.reply.send(run(&engine, &job.image));
                }
                debug!("OCR worker stopped");
            })
            .map_err(|e| OcrError::ModelLoad(format!("failed to start OCR thread: {}", e)))?;

        ready_rx
            .recv()
            .map_err(|_| OcrError::ModelLoad("OCR thread exited during startup".to_string()))??;

        Ok(Self { jobs })
    }

    /// Run the engine on `image` and wait for the boxes.
    pub(crate) fn run(&self, image: &DynamicImage) -> Result<Vec<TextBox>, OcrError> {
        let (reply, result) = mpsc::channel();
        self.jobs
            .send(Job {
                image: image.clone(),
                reply,
            })
            .map_err(|_| OcrError::Recognition("OCR thread is not running".to_string()))?;

        result
            .recv()
            .map_err(|_| OcrError::Recognition("OCR thread stopped before answering".to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::Arc;

    /// Engine that cannot cross threads, like the real one.
    struct CountingEngine {
        calls: Rc<RefCell<u32>>,
    }

    fn counting_worker() -> OcrWorker {
        OcrWorker::spawn(
            "ocr-test",
            || {
                Ok(CountingEngine {
                    calls: Rc::new(RefCell::new(0)),
                })
            },
            |engine: &CountingEngine, image: &DynamicImage| {
                *engine.calls.borrow_mut() += 1;
                Ok(vec![TextBox {
                    bbox: [0.0; 8],
                    text: format!("{}x{} #{}", image.width(), image.height(), engine.calls.borrow()),
                    confidence: 1.0,
                }])
            },
        )
        .unwrap()
    }

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_worker_is_shareable() {
        assert_send_sync::<OcrWorker>();
    }

    #[test]
    fn test_engine_stays_on_its_thread() {
        let worker = counting_worker();
        let image = DynamicImage::new_rgb8(4, 3);

        assert_eq!(worker.run(&image).unwrap()[0].text, "4x3 #1");
        assert_eq!(worker.run(&image).unwrap()[0].text, "4x3 #2");
    }

    #[test]
    fn test_calls_from_many_threads() {
        let worker = Arc::new(counting_worker());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let worker = Arc::clone(&worker);
                thread::spawn(move || worker.run(&DynamicImage::new_rgb8(2, 2)).unwrap().len())
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 1);
        }
        assert_eq!(worker.run(&DynamicImage::new_rgb8(2, 2)).unwrap()[0].text, "2x2 #5");
    }

    #[test]
    fn test_build_error_is_returned() {
        let result = OcrWorker::spawn(
            "ocr-test",
            || Err::<(), _>(OcrError::ModelLoad("bad model".to_string())),
            |_: &(), _: &DynamicImage| Ok(Vec::new()),
        );
        match result {
            Err(OcrError::ModelLoad(message)) => assert_eq!(message, "bad model"),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("build should fail"),
        }
    }

    #[test]
    fn test_run_errors_are_forwarded() {
        let worker = OcrWorker::spawn(
            "ocr-test",
            || Ok(()),
            |_: &(), _: &DynamicImage| Err(OcrError::Recognition("no text layer".to_string())),
        )
        .unwrap();

        assert!(matches!(
            worker.run(&DynamicImage::new_rgb8(1, 1)),
            Err(OcrError::Recognition(_))
        ));
    }
}
