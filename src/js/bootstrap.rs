//! JavaScript evaluated once per environment to build the `mercury` global on
//! top of the native `__mercury_*__` primitives.
//!
//! The script evaluates to an init function. Calling it with the environment
//! options returns the hooks Rust uses to call back into JS.

pub(crate) const BRIDGE_BOOTSTRAP: &str = r#"
(function (options) {
    'use strict';
    const global = globalThis;

    const nativeInvokeModule = global.__mercury_invoke_module__;
    const addModuleListener = global.__mercury_add_module_listener__;
    const removeModuleListener = global.__mercury_remove_module_listener__;
    const clearModuleListener = global.__mercury_clear_module_listener__;
    const nativeDispatchToHost = global.__mercury_dispatch_to_host__;
    const nativeIsProxy = global.__mercury_is_proxy__;
    const print = global.__mercury_print__;
    const reload = global.__mercury_location_reload__;

    const decode = (raw) => (raw == null ? undefined : JSON.parse(raw));
    const encode = (value) => {
        if (value === undefined || value === null) {
            return null;
        }
        const encoded = JSON.stringify(value);
        return encoded === undefined ? null : encoded;
    };

    function invokeModule(module, method, params, callback) {
        const encodedParams = encode(params);
        let settle = null;
        if (typeof callback === 'function') {
            settle = (errorMessage, errorCode, dataJson) => {
                if (errorMessage != null) {
                    const error = new Error(errorMessage);
                    if (errorCode != null) {
                        error.code = errorCode;
                    }
                    return callback(error, undefined);
                }
                return callback(null, dataJson == null ? null : JSON.parse(dataJson));
            };
        }
        return decode(nativeInvokeModule(String(module), String(method), encodedParams, settle));
    }

    function dispatchToHost(eventName, data) {
        const payload = JSON.stringify(Array.isArray(data) ? data : []);
        return decode(nativeDispatchToHost(String(eventName), payload));
    }

    function isProxy(value) {
        let encoded = null;
        try {
            encoded = encode(value);
        } catch (err) {
            encoded = null;
        }
        return nativeIsProxy(encoded);
    }

    const define = (key, value, enumerable = true) => {
        Object.defineProperty(global, key, {
            value,
            enumerable,
            writable: true,
            configurable: true,
        });
    };

    define('__mercury_invoke_module__', invokeModule, false);
    define('__mercury_dispatch_to_host__', dispatchToHost, false);
    define('__mercury_is_proxy__', isProxy, false);

    if (typeof global.Event !== 'function') {
        class Event {
            constructor(type, init) {
                if (arguments.length === 0) {
                    throw new TypeError('Failed to construct "Event": 1 argument required');
                }
                const eventInit = init && typeof init === 'object' ? init : {};
                this.type = String(type);
                this.bubbles = !!eventInit.bubbles;
                this.cancelable = !!eventInit.cancelable;
                this.defaultPrevented = false;
                this.target = null;
                this.currentTarget = null;
                this.timeStamp = Date.now();
                this._immediatePropagationStopped = false;
            }
            preventDefault() {
                if (this.cancelable) {
                    this.defaultPrevented = true;
                }
            }
            stopPropagation() {}
            stopImmediatePropagation() {
                this._immediatePropagationStopped = true;
            }
        }
        define('Event', Event, false);
    }

    if (typeof global.CustomEvent !== 'function') {
        class CustomEvent extends global.Event {
            constructor(type, init) {
                super(type, init);
                this.detail = init && init.detail !== undefined ? init.detail : null;
            }
        }
        define('CustomEvent', CustomEvent, false);
    }

    if (typeof global.EventTarget !== 'function') {
        const LISTENERS = Symbol('listeners');
        const captureFlag = (options) =>
            typeof options === 'boolean' ? options : !!(options && options.capture);

        class EventTarget {
            constructor() {
                Object.defineProperty(this, LISTENERS, { value: new Map() });
            }
            addEventListener(type, listener, options) {
                if (listener == null) {
                    return;
                }
                const capture = captureFlag(options);
                const once = !!(options && typeof options === 'object' && options.once);
                let bucket = this[LISTENERS].get(type);
                if (!bucket) {
                    bucket = [];
                    this[LISTENERS].set(type, bucket);
                }
                if (bucket.some((entry) => entry.listener === listener && entry.capture === capture)) {
                    return;
                }
                bucket.push({ listener, capture, once, removed: false });
            }
            removeEventListener(type, listener, options) {
                const bucket = this[LISTENERS].get(type);
                if (!bucket) {
                    return;
                }
                const capture = captureFlag(options);
                const index = bucket.findIndex(
                    (entry) => entry.listener === listener && entry.capture === capture,
                );
                if (index >= 0) {
                    bucket[index].removed = true;
                    bucket.splice(index, 1);
                }
            }
            dispatchEvent(event) {
                if (event == null || typeof event.type !== 'string') {
                    throw new TypeError(
                        'Failed to execute "dispatchEvent" on "EventTarget": parameter 1 is not of type "Event"',
                    );
                }
                event.target = this;
                event.currentTarget = this;
                const bucket = this[LISTENERS].get(event.type);
                if (bucket) {
                    for (const entry of bucket.slice()) {
                        if (entry.removed) {
                            continue;
                        }
                        if (entry.once) {
                            this.removeEventListener(event.type, entry.listener, entry.capture);
                        }
                        if (typeof entry.listener === 'function') {
                            entry.listener.call(this, event);
                        } else if (typeof entry.listener.handleEvent === 'function') {
                            entry.listener.handleEvent(event);
                        }
                        if (event._immediatePropagationStopped) {
                            break;
                        }
                    }
                }
                event.currentTarget = null;
                return !event.defaultPrevented;
            }
        }
        define('EventTarget', EventTarget, false);
    }

    let methodCallHandlers = Object.create(null);

    // Like flutter platform channels.
    const methodChannel = {
        addMethodCallHandler(method, handler) {
            if (typeof handler !== 'function') {
                throw new Error('mercury.addMethodCallHandler: handler should be an function.');
            }
            methodCallHandlers[method] = handler;
        },
        removeMethodCallHandler(method) {
            delete methodCallHandlers[method];
        },
        clearMethodCallHandler() {
            methodCallHandlers = Object.create(null);
        },
        invokeMethod(method, ...args) {
            return new Promise((resolve, reject) => {
                invokeModule('MethodChannel', 'invokeMethod', [method, args], (error, data) => {
                    if (error) {
                        return reject(error);
                    }
                    resolve(data);
                });
            });
        },
    };

    function triggerMethodCallHandler(method, args) {
        if (!Object.prototype.hasOwnProperty.call(methodCallHandlers, method)) {
            return null;
        }
        return methodCallHandlers[method](args);
    }

    const methodChannelListener = (event, data) => {
        if (!Array.isArray(data) || typeof data[0] !== 'string') {
            return null;
        }
        const args = data[1];
        if (args != null && !Array.isArray(args)) {
            return null;
        }
        return triggerMethodCallHandler(data[0], args == null ? [] : args);
    };

    class MercuryDispatcher extends global.EventTarget {
        dispatch(eventName, ...data) {
            return dispatchToHost(eventName, data);
        }
    }

    const mercury = {
        methodChannel,
        invokeModule,
        addMercuryModuleListener: addModuleListener,
        clearMercuryModuleListener: clearModuleListener,
        removeMercuryModuleListener: removeModuleListener,
        print,
        reload,
        isProxy,
    };

    const dispatcher = options.exposeDispatcher ? new MercuryDispatcher() : null;
    if (dispatcher) {
        mercury.dispatcher = dispatcher;
    }

    define('mercury', mercury);

    const stringify = (value) => {
        try {
            if (typeof value === 'string') {
                return value;
            }
            if (value === undefined) {
                return 'undefined';
            }
            if (value === null) {
                return 'null';
            }
            if (value instanceof Error) {
                return `${value.name}: ${value.message}`;
            }
            if (typeof value === 'object') {
                const json = JSON.stringify(value);
                return json === undefined ? String(value) : json;
            }
            return String(value);
        } catch (err) {
            return '[unprintable]';
        }
    };

    const logger = (level) => (...args) => {
        try {
            print(args.map(stringify).join(' '), level);
        } catch (err) {
            // console must never throw
        }
    };

    if (typeof global.console !== 'object' || global.console === null) {
        define('console', {});
    }
    global.console.log = logger('log');
    global.console.info = logger('info');
    global.console.warn = logger('warn');
    global.console.error = logger('error');
    global.console.debug = logger('debug');

    return {
        methodChannelListener,
        invokeListener(listener, eventType, detailJson, extraJson) {
            const event = eventType == null
                ? null
                : new global.CustomEvent(eventType, { detail: detailJson == null ? null : JSON.parse(detailJson) });
            const extra = extraJson == null ? null : JSON.parse(extraJson);
            return encode(listener(event, extra));
        },
        deliverEvent(eventType, detailJson, cancelable) {
            if (!dispatcher) {
                return true;
            }
            const event = new global.CustomEvent(eventType, {
                detail: detailJson == null ? null : JSON.parse(detailJson),
                cancelable: !!cancelable,
            });
            return dispatcher.dispatchEvent(event);
        },
    };
})
"#;
